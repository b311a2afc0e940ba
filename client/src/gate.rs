//! Single-flight refresh gate.
//!
//! At most one refresh runs per client. Callers arriving while it is in
//! flight receive a clone of the same shared future. The refresh itself runs
//! on its own Tokio task, so it completes (and its result is applied) even
//! if every awaiting caller is dropped; a consumed single-use refresh token
//! is never thrown away half-way.

use crate::error::AuthError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Outcome of the refresh shared by every caller.
pub(crate) type RefreshFuture = Shared<BoxFuture<'static, Result<(), AuthError>>>;

struct Flight {
    id: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct Slot {
    next_id: u64,
    flight: Option<Flight>,
}

/// Holds the in-flight refresh, if any.
#[derive(Default)]
pub(crate) struct RefreshGate {
    slot: Arc<Mutex<Slot>>,
}

impl RefreshGate {
    /// Join the in-flight refresh, or start one.
    ///
    /// When nothing is in flight, `still_needed` is evaluated under the gate
    /// lock; if it returns `false` no refresh is started and `None` is
    /// returned. This is how a caller that raced with a refresh which just
    /// finished avoids issuing a second one.
    pub(crate) fn join_or_start<F>(
        &self,
        still_needed: impl FnOnce() -> bool,
        start: F,
    ) -> Option<RefreshFuture>
    where
        F: FnOnce() -> BoxFuture<'static, Result<(), AuthError>>,
    {
        let mut slot = lock(&self.slot);
        if let Some(flight) = &slot.flight {
            tracing::trace!(flight = flight.id, "Joining in-flight refresh");
            return Some(flight.future.clone());
        }
        if !still_needed() {
            return None;
        }

        let id = slot.next_id;
        slot.next_id += 1;

        let work = start();
        let gate = Arc::clone(&self.slot);
        let task = tokio::spawn(async move {
            let result = work.await;
            let mut slot = lock(&gate);
            if slot.flight.as_ref().is_some_and(|flight| flight.id == id) {
                slot.flight = None;
            }
            result
        });

        let future = async move {
            task.await
                .unwrap_or_else(|e| Err(AuthError::Network(format!("refresh task failed: {e}"))))
        }
        .boxed()
        .shared();

        slot.flight = Some(Flight {
            id,
            future: future.clone(),
        });
        Some(future)
    }

    #[cfg(test)]
    fn in_flight(&self) -> bool {
        lock(&self.slot).flight.is_some()
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
