//! Persisted session storage abstraction.
//!
//! The client mirrors its session into one fixed key of a shared key-value
//! slot. Several clients (contexts) may share the same slot; each one learns
//! about writes made by the others through [`SessionStorage::watch`], which
//! is how contexts converge on the most recently issued token set.
//!
//! # Consistency
//!
//! Convergence is best-effort: there is no lock across contexts, so two
//! contexts that both see an expiring token at the same time may both
//! refresh. The last write to the slot wins.
//!
//! # Implementations
//!
//! - `MemoryStorage` in `bit2bit-testing` - shared in-process slot with sibling contexts
//! - `FileStorage` in `bit2bit-client` - one JSON file per key, polled for external changes

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Default storage key for the persisted session.
pub const DEFAULT_STORAGE_KEY: &str = "b2bAuth";

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Reading or writing the backing medium failed
    #[error("Storage I/O failed: {0}")]
    Io(String),

    /// The storage cannot be used (bad key, missing directory, ...)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A change made to the shared slot by another context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEvent {
    /// Key that changed
    pub key: String,
    /// New raw value, `None` when the key was removed
    pub new_value: Option<String>,
}

/// Stream of changes made by other contexts.
pub type StorageEventStream = Pin<Box<dyn Stream<Item = StorageEvent> + Send>>;

/// Shared key-value slot holding the persisted session.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the client calls them from its
/// own tasks as well as from callers' tasks.
pub trait SessionStorage: Send + Sync + 'static {
    /// Read the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns error if the backing medium cannot be read.
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;

    /// Write `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns error if the backing medium cannot be written.
    fn store(&self, key: &str, value: String) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Delete `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the backing medium cannot be written.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Subscribe to changes made by *other* contexts.
    ///
    /// Writes made through this handle are not reported back to it.
    fn watch(&self) -> StorageEventStream;
}
