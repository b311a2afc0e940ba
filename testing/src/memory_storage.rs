//! In-memory shared storage with sibling contexts.
//!
//! One [`MemoryStorage`] value is one context attached to a shared slot.
//! [`MemoryStorage::context`] creates a sibling attached to the same slot;
//! writes from one context are delivered to every other context's
//! [`watch`](SessionStorage::watch) stream but never back to the writer,
//! matching how a browser reports storage changes only to other tabs.

use bit2bit_core::storage::{SessionStorage, StorageError, StorageEvent, StorageEventStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
struct Shared {
    slots: Mutex<HashMap<String, String>>,
    events: broadcast::Sender<(u64, StorageEvent)>,
    next_context: AtomicU64,
}

/// One context attached to an in-memory shared slot.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    context: u64,
}

impl MemoryStorage {
    /// Create a new empty slot and the first context attached to it.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                events,
                next_context: AtomicU64::new(1),
            }),
            context: 0,
        }
    }

    /// Attach a new sibling context to the same slot.
    #[must_use]
    pub fn context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context: self.shared.next_context.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Read a raw value without going through the async trait (for assertions).
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.slots().get(key).cloned()
    }

    /// Write a raw value as this context would, notifying siblings.
    pub fn put_raw(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.slots().insert(key.to_string(), value.clone());
        self.notify(key, Some(value));
    }

    /// Delete a raw value as this context would, notifying siblings.
    pub fn delete_raw(&self, key: &str) {
        let removed = self.slots().remove(key);
        if removed.is_some() {
            self.notify(key, None);
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.shared.events.send((
            self.context,
            StorageEvent {
                key: key.to_string(),
                new_value,
            },
        ));
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.raw(key))
    }

    async fn store(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.put_raw(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.delete_raw(key);
        Ok(())
    }

    fn watch(&self) -> StorageEventStream {
        let own_context = self.context;
        let receiver = self.shared.events.subscribe();

        futures::stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok((origin, event)) if origin != own_context => return Some((event, receiver)),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
