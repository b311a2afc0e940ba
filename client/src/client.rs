//! Session client implementation
//!
//! The client is the imperative shell around
//! [`SessionReducer`](bit2bit_core::session::SessionReducer): it performs the
//! network calls, feeds their outcome to the reducer as actions, and runs the
//! effects the reducer returns (persist, remove, arm or cancel the timer).
//!
//! Transitions are serialized: reducing an action and running its effects
//! happens under one lock, so storage always ends up reflecting the last
//! transition. Reading the session never waits on that lock.

use crate::config::{ClientConfig, ConfigError};
use crate::error::AuthError;
use crate::gate::RefreshGate;
use crate::messages::{RefreshRequest, SignInRequest};
use crate::renewal::RenewalTimer;
use crate::request::{RequestBody, RequestOptions};
use crate::sync;
use bit2bit_core::environment::{Clock, SystemClock};
use bit2bit_core::reducer::Reducer;
use bit2bit_core::session::{
    PersistedSession, Session, SessionAction, SessionEffect, SessionEnvironment, SessionReducer,
    SessionState, TokenGrant,
};
use bit2bit_core::storage::SessionStorage;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::{Method, Response, StatusCode};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, Weak};
use tokio::task::JoinHandle;

/// Token-lifecycle client for the fleet API.
///
/// Cheap to clone; clones share one session.
///
/// # Example
///
/// ```no_run
/// use bit2bit_client::{ClientConfig, SessionClient, FileStorage};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = FileStorage::open(".bit2bit").await?;
/// let client = SessionClient::new(ClientConfig::default(), storage)?;
///
/// client.sign_in("a@x.com", "p").await?;
/// let response = client.get("/plants/count").await?;
/// println!("{}", response.text().await?);
/// # Ok(())
/// # }
/// ```
pub struct SessionClient<S: SessionStorage> {
    inner: Arc<Inner<S>>,
}

impl<S: SessionStorage> Clone for SessionClient<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SessionStorage> std::fmt::Debug for SessionClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("base_url", &self.inner.config.base_url)
            .field("state", &*self.inner.read_state())
            .finish_non_exhaustive()
    }
}

pub(crate) struct Inner<S> {
    http: reqwest::Client,
    config: ClientConfig,
    storage: S,
    env: SessionEnvironment,
    state: RwLock<SessionState>,
    transitions: tokio::sync::Mutex<()>,
    gate: RefreshGate,
    timer: RenewalTimer,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SessionStorage> SessionClient<S> {
    /// Create a client using the system clock.
    ///
    /// Spawns the task that follows session changes made by other contexts
    /// sharing `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(config: ClientConfig, storage: S) -> Result<Self, ConfigError> {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    /// Create a client with an injected clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_clock(
        config: ClientConfig,
        storage: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        let env = SessionEnvironment::new(clock).with_renewal_margin(config.renewal_margin);
        let events = storage.watch();

        let inner = Arc::new(Inner {
            http,
            config,
            storage,
            env,
            state: RwLock::new(SessionState::default()),
            transitions: tokio::sync::Mutex::new(()),
            gate: RefreshGate::default(),
            timer: RenewalTimer::default(),
            listener: Mutex::new(None),
        });

        let listener = sync::spawn_listener(
            Arc::downgrade(&inner),
            inner.config.storage_key.clone(),
            events,
        );
        *inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);

        Ok(Self { inner })
    }

    /// Exchange credentials for a session.
    ///
    /// On success the session is stored in memory, persisted, and the
    /// renewal timer is armed. On failure the current session (if any) is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] with the server's text body on a non-2xx answer
    /// - [`AuthError::Network`] when the endpoint cannot be reached
    /// - [`AuthError::InvalidResponse`] when the success body is malformed
    #[tracing::instrument(skip(self, password), name = "session_sign_in")]
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let inner = &self.inner;
        let response = inner
            .http
            .post(inner.config.url(&inner.config.sign_in_path))
            .json(&SignInRequest { email, password })
            .send()
            .await
            .map_err(|e| AuthError::network(&e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Sign-in rejected");
            return Err(AuthError::InvalidCredentials {
                status: status.as_u16(),
                message,
            });
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        inner
            .dispatch(SessionAction::SignedIn {
                email: email.to_string(),
                grant,
            })
            .await;
        tracing::info!("Signed in");
        Ok(())
    }

    /// Drop the session: memory cleared, timer cancelled, persisted copy
    /// removed. Calling it while signed out is a no-op.
    #[tracing::instrument(skip(self), name = "session_sign_out")]
    pub async fn sign_out(&self) {
        self.inner.dispatch(SessionAction::SignedOut).await;
        tracing::info!("Signed out");
    }

    /// Load the persisted session if none is in memory.
    ///
    /// Runs implicitly before every authenticated request; exposed for
    /// callers that want [`is_authenticated`](Self::is_authenticated) to
    /// reflect a previous run before issuing a request.
    ///
    /// Returns whether a session is loaded afterwards.
    pub async fn restore(&self) -> bool {
        if !self.inner.read_state().is_active() {
            self.inner.restore().await;
        }
        self.is_authenticated()
    }

    /// Send a request to `path` with the session's bearer token.
    ///
    /// The token is refreshed first when it is within the renewal margin.
    /// A 401 answer triggers exactly one forced refresh and one retry; the
    /// retry's response is returned whatever its status. Any other status is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] when there is no session
    /// - [`AuthError::RefreshFailed`] when the token could not be renewed
    /// - [`AuthError::Network`] when the request cannot be sent
    #[tracing::instrument(skip(self, options), fields(method = %options.method()), name = "session_request")]
    pub async fn authenticated_request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response, AuthError> {
        let inner = &self.inner;
        let (token, generation) = inner.fresh_token().await?;
        let url = inner.config.url(path);

        let response = inner.send(&url, &options, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("Request unauthorized, refreshing once before retrying");
        metrics::counter!("bit2bit_session_request_retries_total").increment(1);
        inner
            .refresh(generation)
            .await
            .map_err(AuthError::refresh_failed)?;

        let (token, _) = inner.current_token().ok_or(AuthError::NotAuthenticated)?;
        inner.send(&url, &options, &token).await
    }

    /// `GET path`
    ///
    /// # Errors
    ///
    /// See [`authenticated_request`](Self::authenticated_request).
    pub async fn get(&self, path: &str) -> Result<Response, AuthError> {
        self.authenticated_request(path, RequestOptions::new(Method::GET))
            .await
    }

    /// `POST path` with `body`
    ///
    /// # Errors
    ///
    /// See [`authenticated_request`](Self::authenticated_request).
    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Response, AuthError> {
        self.authenticated_request(path, RequestOptions::new(Method::POST).body(body))
            .await
    }

    /// `PUT path` with `body`
    ///
    /// # Errors
    ///
    /// See [`authenticated_request`](Self::authenticated_request).
    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Response, AuthError> {
        self.authenticated_request(path, RequestOptions::new(Method::PUT).body(body))
            .await
    }

    /// `PATCH path` with `body`
    ///
    /// # Errors
    ///
    /// See [`authenticated_request`](Self::authenticated_request).
    pub async fn patch(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Response, AuthError> {
        self.authenticated_request(path, RequestOptions::new(Method::PATCH).body(body))
            .await
    }

    /// `DELETE path`
    ///
    /// # Errors
    ///
    /// See [`authenticated_request`](Self::authenticated_request).
    pub async fn delete(&self, path: &str) -> Result<Response, AuthError> {
        self.authenticated_request(path, RequestOptions::new(Method::DELETE))
            .await
    }

    /// `OPTIONS path`
    ///
    /// # Errors
    ///
    /// See [`authenticated_request`](Self::authenticated_request).
    pub async fn options(&self, path: &str) -> Result<Response, AuthError> {
        self.authenticated_request(path, RequestOptions::new(Method::OPTIONS))
            .await
    }

    /// Whether a session is loaded in memory. Never blocks.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.read_state().is_active()
    }

    /// Email of the signed-in user.
    #[must_use]
    pub fn current_user_email(&self) -> Option<String> {
        self.inner
            .read_state()
            .session
            .as_ref()
            .map(|session| session.user_email.clone())
    }

    /// Copy of the current session.
    #[must_use]
    pub fn session_snapshot(&self) -> Option<Session> {
        self.inner.read_state().session.clone()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl<S: SessionStorage> Inner<S> {
    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_token(&self) -> Option<(String, u64)> {
        let state = self.read_state();
        state
            .session
            .as_ref()
            .map(|session| (session.access_token.clone(), state.generation))
    }

    /// Reduce `action` and run the resulting effects.
    pub(crate) async fn dispatch(self: &Arc<Self>, action: SessionAction) {
        let _transition = self.transitions.lock().await;

        let effects = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            SessionReducer.reduce(&mut state, action, &self.env)
        };

        tracing::trace!("Executing {} session effects", effects.len());
        for effect in effects {
            self.execute(effect).await;
        }
    }

    async fn execute(self: &Arc<Self>, effect: SessionEffect) {
        let key = &self.config.storage_key;
        match effect {
            SessionEffect::Persist(record) => match record.encode() {
                Ok(raw) => {
                    if let Err(e) = self.storage.store(key, raw).await {
                        tracing::warn!(error = %e, "Failed to persist session");
                    }
                },
                Err(e) => tracing::warn!(error = %e, "Failed to encode session"),
            },
            SessionEffect::RemovePersisted => {
                if let Err(e) = self.storage.remove(key).await {
                    tracing::warn!(error = %e, "Failed to remove persisted session");
                }
            },
            SessionEffect::ScheduleRenewal { delay, generation } => {
                self.timer
                    .arm(delay, renewal_job(Arc::downgrade(self), generation));
            },
            SessionEffect::CancelRenewal => self.timer.cancel(),
        }
    }

    /// Load the persisted session.
    ///
    /// The generation is read before the slot, so a sign-out that lands
    /// while the read is in flight discards the result. A corrupted slot is
    /// removed only if it still holds the same corrupted value; a sibling
    /// could still write between that check and the removal.
    async fn restore(self: &Arc<Self>) {
        let key = &self.config.storage_key;
        let generation = self.read_state().generation;
        let raw = match self.storage.load(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted session");
                return;
            },
        };

        match PersistedSession::decode(&raw) {
            Ok(Some(session)) => {
                tracing::debug!(email = %session.user_email, "Restoring persisted session");
                self.dispatch(SessionAction::Restored {
                    generation,
                    session,
                })
                .await;
            },
            Ok(None) => tracing::debug!("Persisted session carries no access token"),
            Err(e) => {
                tracing::warn!(error = %e, "Persisted session is corrupted, removing it");
                self.remove_corrupted(&raw).await;
            },
        }
    }

    async fn remove_corrupted(&self, corrupted: &str) {
        let key = &self.config.storage_key;
        let _transition = self.transitions.lock().await;
        match self.storage.load(key).await {
            Ok(Some(current)) if current == corrupted => {
                if let Err(e) = self.storage.remove(key).await {
                    tracing::warn!(error = %e, "Failed to remove corrupted session");
                }
            },
            Ok(_) => tracing::debug!("Slot rewritten since it was read, keeping it"),
            Err(e) => tracing::warn!(error = %e, "Failed to re-read persisted session"),
        }
    }

    /// Token to use for the next request, refreshed first when it is inside
    /// the renewal margin.
    async fn fresh_token(self: &Arc<Self>) -> Result<(String, u64), AuthError> {
        if !self.read_state().is_active() {
            self.restore().await;
        }

        let (expiring, generation) = {
            let state = self.read_state();
            let session = state.session.as_ref().ok_or(AuthError::NotAuthenticated)?;
            (
                session.expires_within(self.env.now(), self.env.renewal_margin),
                state.generation,
            )
        };

        if expiring {
            tracing::debug!("Access token inside renewal margin, refreshing");
            self.refresh(generation)
                .await
                .map_err(AuthError::refresh_failed)?;
        }

        self.current_token().ok_or(AuthError::NotAuthenticated)
    }

    /// Refresh through the single-flight gate.
    ///
    /// `observed` is the generation the caller based its decision on. If
    /// the session has moved on since (someone else refreshed, signed in or
    /// out) and no refresh is in flight, nothing is sent.
    pub(crate) async fn refresh(self: &Arc<Self>, observed: u64) -> Result<(), AuthError> {
        let inner = Arc::clone(self);
        let flight = self.gate.join_or_start(
            || self.read_state().generation == observed,
            move || inner.refresh_once(),
        );
        match flight {
            Some(flight) => flight.await,
            None => {
                tracing::trace!("Session changed since it was observed, no refresh needed");
                Ok(())
            },
        }
    }

    fn refresh_once(self: Arc<Self>) -> BoxFuture<'static, Result<(), AuthError>> {
        async move {
            let outcome = self.exchange_refresh_token().await;
            let label = match &outcome {
                Ok(()) => "success",
                Err(e) => e.reason(),
            };
            metrics::counter!("bit2bit_session_refresh_total", "outcome" => label).increment(1);
            outcome
        }
        .boxed()
    }

    #[tracing::instrument(skip(self), name = "session_refresh")]
    async fn exchange_refresh_token(self: &Arc<Self>) -> Result<(), AuthError> {
        let (generation, refresh_token) = {
            let state = self.read_state();
            let session = state.session.as_ref().ok_or(AuthError::NotAuthenticated)?;
            (state.generation, session.refresh_token.clone())
        };
        let Some(refresh_token) = refresh_token else {
            tracing::warn!("No refresh token held, ending session");
            self.dispatch(SessionAction::RefreshRejected { generation })
                .await;
            return Err(AuthError::NoRefreshToken);
        };

        let response = self
            .http
            .post(self.config.url(&self.config.refresh_path))
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await
            .map_err(|e| AuthError::network(&e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Refresh rejected, ending session");
            self.dispatch(SessionAction::RefreshRejected { generation })
                .await;
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
            });
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        self.dispatch(SessionAction::Refreshed { generation, grant })
            .await;

        if self.read_state().is_active() {
            tracing::info!("Session refreshed");
            Ok(())
        } else {
            tracing::debug!("Signed out while refreshing, result discarded");
            Err(AuthError::NotAuthenticated)
        }
    }

    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        token: &str,
    ) -> Result<Response, AuthError> {
        options
            .build(&self.http, url, token)?
            .send()
            .await
            .map_err(|e| AuthError::network(&e))
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
    }
}

/// Timer job: refresh ahead of expiry unless the session moved on.
fn renewal_job<S: SessionStorage>(inner: Weak<Inner<S>>, generation: u64) -> BoxFuture<'static, ()> {
    async move {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        tracing::debug!(generation, "Renewal timer fired");
        if let Err(e) = inner.refresh(generation).await {
            tracing::warn!(error = %e, reason = e.reason(), "Proactive refresh failed");
        }
    }
    .boxed()
}
