//! File-backed session storage.
//!
//! Each key is one JSON file (`<key>.json`) in a directory. Writes go to a
//! temporary file that is renamed over the target, so readers never see a
//! half-written session. Several processes pointing at the same directory
//! share the session; each one notices the others' writes by polling the
//! directory.

use bit2bit_core::storage::{SessionStorage, StorageError, StorageEvent, StorageEventStream};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default interval between directory scans in [`SessionStorage::watch`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const EXTENSION: &str = "json";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Last value this handle wrote per key (`None` = removed).
type OwnWrites = Arc<Mutex<HashMap<String, Option<String>>>>;

/// Session storage in a directory of JSON files.
///
/// Clones are the same context: they do not see each other's writes as
/// external changes.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    poll_interval: Duration,
    own_writes: OwnWrites,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            StorageError::Unavailable(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
            own_writes: Arc::default(),
        })
    }

    /// Set how often [`watch`](SessionStorage::watch) scans the directory.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Directory holding the session files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::Unavailable(format!(
                "invalid storage key '{key}'"
            )));
        }
        Ok(self.dir.join(format!("{key}.{EXTENSION}")))
    }

    /// Mark `value` as written by this context, returning the previous mark.
    ///
    /// Marked before touching the disk so a scan racing the write never
    /// reports it back to us.
    fn record_own_write(&self, key: &str, value: Option<String>) -> Option<Option<String>> {
        self.own_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value)
    }

    /// Undo a mark whose write never reached the disk.
    fn restore_own_write(&self, key: &str, previous: Option<Option<String>>) {
        let mut own_writes = self.own_writes.lock().unwrap_or_else(PoisonError::into_inner);
        match previous {
            Some(value) => own_writes.insert(key.to_string(), value),
            None => own_writes.remove(key),
        };
    }
}

impl SessionStorage for FileStorage {
    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(format!("read {}: {e}", path.display()))),
        }
    }

    async fn store(&self, key: &str, value: String) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let temp_path = self.dir.join(format!(
            ".{key}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let previous = self.record_own_write(key, Some(value.clone()));
        if let Err(e) = tokio::fs::write(&temp_path, value).await {
            self.restore_own_write(key, previous);
            return Err(StorageError::Io(format!("write {}: {e}", temp_path.display())));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            self.restore_own_write(key, previous);
            return Err(StorageError::Io(format!("rename to {}: {e}", path.display())));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let previous = self.record_own_write(key, None);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                self.restore_own_write(key, previous);
                Err(StorageError::Io(format!("remove {}: {e}", path.display())))
            },
        }
    }

    /// Must be called within a Tokio runtime: the baseline scan starts on
    /// the blocking pool right away.
    fn watch(&self) -> StorageEventStream {
        let dir = self.dir.clone();
        let poller = Poller {
            baseline: Some(tokio::task::spawn_blocking(move || scan(&dir))),
            known: HashMap::new(),
            dir: self.dir.clone(),
            interval: self.poll_interval,
            own_writes: Arc::clone(&self.own_writes),
        };

        futures::stream::unfold(poller, |mut poller| async move {
            if let Some(baseline) = poller.baseline.take() {
                poller.known = baseline.await.unwrap_or_default();
            }
            loop {
                tokio::time::sleep(poller.interval).await;
                let dir = poller.dir.clone();
                let Ok(current) = tokio::task::spawn_blocking(move || scan(&dir)).await else {
                    continue;
                };
                let events = poller.diff(current);
                if !events.is_empty() {
                    return Some((futures::stream::iter(events), poller));
                }
            }
        })
        .flatten()
        .boxed()
    }
}

struct Poller {
    baseline: Option<JoinHandle<HashMap<String, String>>>,
    dir: PathBuf,
    interval: Duration,
    known: HashMap<String, String>,
    own_writes: OwnWrites,
}

impl Poller {
    /// Changes between the last scan and `current`, minus this context's own writes.
    fn diff(&mut self, current: HashMap<String, String>) -> Vec<StorageEvent> {
        let mut changes: Vec<(String, Option<String>)> = current
            .iter()
            .filter(|(key, value)| self.known.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), Some(value.clone())))
            .collect();
        changes.extend(
            self.known
                .keys()
                .filter(|key| !current.contains_key(*key))
                .map(|key| (key.clone(), None)),
        );
        self.known = current;

        let own_writes = self
            .own_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        changes
            .into_iter()
            .filter(|(key, value)| own_writes.get(key) != Some(value))
            .map(|(key, new_value)| StorageEvent { key, new_value })
            .collect()
    }
}

/// Current contents of every session file in `dir`.
fn scan(dir: &Path) -> HashMap<String, String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return HashMap::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                return None;
            }
            let key = path.file_stem()?.to_str()?.to_string();
            if !is_valid_key(&key) {
                return None;
            }
            let raw = std::fs::read_to_string(&path).ok()?;
            Some((key, raw))
        })
        .collect()
}

/// Keys become file names: no separators, no traversal, no hidden files.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
