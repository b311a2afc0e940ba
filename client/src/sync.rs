//! Cross-context session sync.
//!
//! Every client follows the writes other contexts make to its storage key.
//! A new value replaces the in-memory session (and re-arms the timer); a
//! removed value means the other context signed out, so this one does too.

use crate::client::Inner;
use bit2bit_core::session::{PersistedSession, Session, SessionAction};
use bit2bit_core::storage::{SessionStorage, StorageEvent, StorageEventStream};
use futures::StreamExt;
use std::sync::Weak;
use tokio::task::JoinHandle;

/// Follow `events` until the stream ends or the client is dropped.
pub(crate) fn spawn_listener<S: SessionStorage>(
    inner: Weak<Inner<S>>,
    key: String,
    mut events: StorageEventStream,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if event.key != key {
                continue;
            }
            let Some(session) = decode_change(&event) else {
                continue;
            };
            let Some(inner) = inner.upgrade() else {
                break;
            };

            tracing::debug!(signed_in = session.is_some(), "Session changed in another context");
            metrics::counter!("bit2bit_session_sync_events_total").increment(1);
            inner
                .dispatch(SessionAction::ExternalChange { session })
                .await;
        }
        tracing::trace!("Session sync listener stopped");
    })
}

/// `Some(change)` for a usable event, `None` for one to ignore.
///
/// A value without an access token is a sign-out just like a removal.
fn decode_change(event: &StorageEvent) -> Option<Option<Session>> {
    match &event.new_value {
        None => Some(None),
        Some(raw) => match PersistedSession::decode(raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed session change");
                None
            },
        },
    }
}
