//! Proactive renewal timer.
//!
//! One timer per client. Arming replaces (aborts) the previous timer. When
//! the delay elapses the renewal job is spawned as its own task, so the job
//! outlives the timer: the refresh it triggers re-arms the timer, which
//! would otherwise abort the very task running it.

use futures::future::BoxFuture;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
pub(crate) struct RenewalTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalTimer {
    /// Run `job` after `delay`, replacing any pending timer.
    pub(crate) fn arm(&self, delay: Duration, job: BoxFuture<'static, ()>) {
        tracing::debug!(delay_secs = delay.as_secs(), "Arming renewal timer");
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(job);
        });
        if let Some(previous) = self.lock().replace(task) {
            previous.abort();
        }
    }

    /// Cancel the pending timer, if any.
    pub(crate) fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            tracing::debug!("Cancelling renewal timer");
            previous.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
