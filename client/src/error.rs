//! Error types for the session client

use thiserror::Error;

/// Errors surfaced by session operations.
///
/// `Clone` so that every caller awaiting the same in-flight refresh receives
/// the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The identity endpoint refused the credentials
    #[error("Sign-in rejected (status {status}): {message}")]
    InvalidCredentials {
        /// HTTP status code
        status: u16,
        /// Text body returned by the server
        message: String,
    },

    /// No session is loaded and none could be restored
    #[error("Not authenticated")]
    NotAuthenticated,

    /// A refresh was needed but the session carries no refresh token; the
    /// session is gone
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The refresh endpoint rejected the refresh token; the session is gone
    #[error("Refresh rejected (status {status})")]
    RefreshRejected {
        /// HTTP status code
        status: u16,
    },

    /// A request could not be authorized because renewal failed
    #[error("Token refresh failed: {source}")]
    RefreshFailed {
        /// Underlying refresh error
        source: Box<AuthError>,
    },

    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// A 2xx response carried a body that could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A header value could not be built
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl AuthError {
    /// Stable machine-readable reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::NotAuthenticated => "not_authenticated",
            Self::NoRefreshToken => "no_refresh_token",
            Self::RefreshRejected { .. } => "refresh_rejected",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidHeader(_) => "invalid_header",
        }
    }

    /// Whether the caller has to sign in again to make progress.
    #[must_use]
    pub fn requires_sign_in(&self) -> bool {
        match self {
            Self::NotAuthenticated | Self::NoRefreshToken | Self::RefreshRejected { .. } => true,
            Self::RefreshFailed { source } => source.requires_sign_in(),
            _ => false,
        }
    }

    /// Wrap an error raised while renewing the token for a request.
    ///
    /// `NotAuthenticated` passes through unchanged: the session vanished
    /// (signed out meanwhile) rather than failing to renew.
    #[must_use]
    pub fn refresh_failed(source: Self) -> Self {
        match source {
            Self::NotAuthenticated => Self::NotAuthenticated,
            other => Self::RefreshFailed {
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn network(err: &reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
