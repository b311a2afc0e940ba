//! Session model and lifecycle state machine.
//!
//! A [`Session`] exists only between a successful sign-in and the next
//! sign-out or unrecoverable refresh failure. Every transition goes through
//! [`SessionReducer`], which mutates [`SessionState`] and returns the
//! [`SessionEffect`]s (persist, remove, schedule renewal) the client must run.
//!
//! # Generations
//!
//! [`SessionState::generation`] increases on every transition that replaces
//! or destroys the session. Asynchronous work (a refresh round trip, a
//! renewal timer) records the generation it started under, and its result is
//! dropped when the generation has moved on. This is what stops a refresh
//! that completes after sign-out from bringing the session back.

use crate::environment::Clock;
use crate::reducer::Reducer;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default safety margin before expiry: tokens are treated as expired 30 seconds early.
pub const DEFAULT_RENEWAL_MARGIN_SECS: i64 = 30;

const REDACTED: &str = "<redacted>";

/// Tokens returned by the sign-in and refresh endpoints.
///
/// The refresh endpoint may omit `refresh_token`, in which case the previous
/// refresh token stays in use.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// New bearer credential
    pub access_token: String,
    /// New refresh credential (absent when the server does not rotate it)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    pub expires_in: u64,
}

impl TokenGrant {
    /// Create a grant.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_in,
        }
    }

    /// Absolute expiry of this grant when issued at `now`, truncated to milliseconds
    /// so it survives the persisted representation unchanged.
    #[must_use]
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lifetime = i64::try_from(self.expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let expiry = now
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        DateTime::<Utc>::from_timestamp_millis(expiry.timestamp_millis()).unwrap_or(expiry)
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &REDACTED)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// An authenticated session.
///
/// The access token and its expiry live in the same value, so an expiry can
/// never exist without the token that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer credential for API calls
    pub access_token: String,
    /// Credential used to mint a new access token
    pub refresh_token: Option<String>,
    /// When `access_token` stops being valid
    pub token_expiry: DateTime<Utc>,
    /// Email used at sign-in (display only, not a credential)
    pub user_email: String,
}

impl Session {
    /// Build a fresh session from a sign-in grant.
    #[must_use]
    pub fn from_grant(grant: TokenGrant, user_email: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            token_expiry: grant.expiry_from(now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            user_email: user_email.into(),
        }
    }

    /// Apply a refresh grant: token and expiry replaced, refresh token replaced
    /// only when rotated, email untouched.
    #[must_use]
    pub fn renewed(self, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            token_expiry: grant.expiry_from(now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(self.refresh_token),
            user_email: self.user_email,
        }
    }

    /// Whether the access token is expired or will expire within `margin`.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        self.token_expiry
            .checked_sub_signed(margin)
            .is_none_or(|deadline| now >= deadline)
    }

    /// How long until proactive renewal should run, or `None` when the token
    /// is already inside the margin.
    #[must_use]
    pub fn renewal_delay(&self, now: DateTime<Utc>, margin: TimeDelta) -> Option<std::time::Duration> {
        let remaining = self.token_expiry.signed_duration_since(now);
        let delay = remaining.checked_sub(&margin)?;
        if delay > TimeDelta::zero() {
            delay.to_std().ok()
        } else {
            None
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &REDACTED)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("token_expiry", &self.token_expiry)
            .field("user_email", &self.user_email)
            .finish()
    }
}

/// User block of the persisted record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedUser {
    /// Email used at sign-in
    #[serde(default)]
    pub email: Option<String>,
}

/// Persisted layout of a session (one JSON value under a fixed storage key).
///
/// ```json
/// {"accessToken": "...", "refreshToken": "...", "tokenExpiry": 1735693200000, "user": {"email": "a@x.com"}}
/// ```
///
/// `tokenExpiry` is epoch milliseconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    /// Bearer credential
    #[serde(default)]
    pub access_token: Option<String>,
    /// Refresh credential
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry in epoch milliseconds (0 when unknown)
    #[serde(default)]
    pub token_expiry: i64,
    /// User details
    #[serde(default)]
    pub user: Option<PersistedUser>,
}

impl PersistedSession {
    /// Parse a persisted record.
    ///
    /// Returns `Ok(None)` when the record is well-formed but carries no
    /// access token.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when `raw` is not a valid record; callers treat
    /// that as a corrupted slot.
    pub fn decode(raw: &str) -> Result<Option<Session>, serde_json::Error> {
        let record: Self = serde_json::from_str(raw)?;
        Ok(record.into_session())
    }

    /// Serialize to the persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Convert to a [`Session`]; `None` when no access token is present.
    #[must_use]
    pub fn into_session(self) -> Option<Session> {
        let access_token = self.access_token.filter(|token| !token.is_empty())?;
        let token_expiry = DateTime::<Utc>::from_timestamp_millis(self.token_expiry)
            .unwrap_or_default();
        Some(Session {
            access_token,
            refresh_token: self.refresh_token.filter(|token| !token.is_empty()),
            token_expiry,
            user_email: self.user.and_then(|user| user.email).unwrap_or_default(),
        })
    }
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: Some(session.access_token.clone()),
            refresh_token: session.refresh_token.clone(),
            token_expiry: session.token_expiry.timestamp_millis(),
            user: Some(PersistedUser {
                email: Some(session.user_email.clone()),
            }),
        }
    }
}

impl fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSession")
            .field("access_token", &self.access_token.as_ref().map(|_| REDACTED))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("token_expiry", &self.token_expiry)
            .field("user", &self.user)
            .finish()
    }
}

/// In-memory session state owned by one client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Current session, `None` when signed out
    pub session: Option<Session>,
    /// Incarnation counter, bumped on every replace/destroy transition
    pub generation: u64,
}

impl SessionState {
    /// Whether a session is currently loaded.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.session.is_some()
    }

    fn install(&mut self, session: Session) {
        self.generation += 1;
        self.session = Some(session);
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.session = None;
    }
}

/// Every input that can change the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// The identity endpoint accepted the credentials.
    SignedIn {
        /// Email used to sign in
        email: String,
        /// Tokens issued
        grant: TokenGrant,
    },
    /// A refresh started under `generation` succeeded.
    Refreshed {
        /// Generation observed when the refresh started
        generation: u64,
        /// Tokens issued
        grant: TokenGrant,
    },
    /// A session was loaded from persisted storage by a read started under
    /// `generation`.
    Restored {
        /// Generation observed before the slot was read
        generation: u64,
        /// Session read from the slot
        session: Session,
    },
    /// Another context wrote (or removed) the shared slot.
    ExternalChange {
        /// New session, `None` when the sibling signed out
        session: Option<Session>,
    },
    /// A refresh started under `generation` cannot succeed: the endpoint
    /// rejected it or the session holds no refresh token.
    RefreshRejected {
        /// Generation observed when the refresh started
        generation: u64,
    },
    /// Explicit sign-out.
    SignedOut,
}

/// Work the client must perform after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEffect {
    /// Write the session to the shared slot.
    Persist(PersistedSession),
    /// Delete the shared slot.
    RemovePersisted,
    /// (Re)arm the renewal timer for `generation`.
    ScheduleRenewal {
        /// Time until the renewal should run
        delay: std::time::Duration,
        /// Generation the timer belongs to
        generation: u64,
    },
    /// Cancel any pending renewal timer.
    CancelRenewal,
}

/// Dependencies of the session reducer.
#[derive(Clone)]
pub struct SessionEnvironment {
    /// Source of the current time
    pub clock: Arc<dyn Clock>,
    /// Tokens within this margin of expiry count as expired
    pub renewal_margin: TimeDelta,
}

impl SessionEnvironment {
    /// Environment with the default 30 second margin.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            renewal_margin: TimeDelta::seconds(DEFAULT_RENEWAL_MARGIN_SECS),
        }
    }

    /// Set the renewal margin.
    #[must_use]
    pub const fn with_renewal_margin(mut self, margin: TimeDelta) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl fmt::Debug for SessionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEnvironment")
            .field("renewal_margin", &self.renewal_margin)
            .finish_non_exhaustive()
    }
}

/// Session lifecycle reducer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionReducer;

impl SessionReducer {
    fn schedule(session: &Session, generation: u64, env: &SessionEnvironment) -> SessionEffect {
        match session.renewal_delay(env.now(), env.renewal_margin) {
            Some(delay) => SessionEffect::ScheduleRenewal { delay, generation },
            None => SessionEffect::CancelRenewal,
        }
    }

    fn install(
        state: &mut SessionState,
        session: Session,
        persist: bool,
        env: &SessionEnvironment,
    ) -> Vec<SessionEffect> {
        state.install(session);
        let Some(session) = state.session.as_ref() else {
            return Vec::new();
        };
        let mut effects = Vec::with_capacity(2);
        if persist {
            effects.push(SessionEffect::Persist(PersistedSession::from(session)));
        }
        effects.push(Self::schedule(session, state.generation, env));
        effects
    }
}

impl Reducer for SessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Effect = SessionEffect;
    type Environment = SessionEnvironment;

    fn reduce(
        &self,
        state: &mut SessionState,
        action: SessionAction,
        env: &SessionEnvironment,
    ) -> Vec<SessionEffect> {
        match action {
            SessionAction::SignedIn { email, grant } => {
                let session = Session::from_grant(grant, email, env.now());
                Self::install(state, session, true, env)
            },
            SessionAction::Refreshed { generation, grant } => {
                if generation != state.generation {
                    return Vec::new();
                }
                let Some(current) = state.session.take() else {
                    return Vec::new();
                };
                let session = current.renewed(grant, env.now());
                Self::install(state, session, true, env)
            },
            SessionAction::Restored {
                generation,
                session,
            } => {
                // A sign-out or sibling removal that landed during the read wins.
                if state.is_active() || generation != state.generation {
                    return Vec::new();
                }
                Self::install(state, session, false, env)
            },
            SessionAction::ExternalChange {
                session: Some(session),
            } => Self::install(state, session, false, env),
            SessionAction::ExternalChange { session: None } => {
                state.clear();
                vec![SessionEffect::CancelRenewal]
            },
            SessionAction::RefreshRejected { generation } => {
                if generation != state.generation {
                    return Vec::new();
                }
                state.clear();
                vec![SessionEffect::CancelRenewal, SessionEffect::RemovePersisted]
            },
            SessionAction::SignedOut => {
                state.clear();
                vec![SessionEffect::CancelRenewal, SessionEffect::RemovePersisted]
            },
        }
    }
}
