//! Client configuration.
//!
//! Values come from the application (or the environment through
//! [`ClientConfig::from_env`]); nothing below is read implicitly.

use bit2bit_core::session::DEFAULT_RENEWAL_MARGIN_SECS;
use bit2bit_core::storage::DEFAULT_STORAGE_KEY;
use chrono::TimeDelta;
use std::time::Duration;
use thiserror::Error;

/// Production API base.
pub const DEFAULT_BASE_URL: &str = "https://houss-api-haimderazon.replit.app/";

/// Default HTTP request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable overriding the API base URL.
pub const ENV_BASE_URL: &str = "B2B_BASE_URL";
/// Environment variable overriding the storage key.
pub const ENV_STORAGE_KEY: &str = "B2B_STORAGE_KEY";
/// Environment variable overriding the renewal margin (seconds).
pub const ENV_RENEWAL_MARGIN_SECS: &str = "B2B_RENEWAL_MARGIN_SECS";
/// Environment variable overriding the request timeout (seconds).
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "B2B_REQUEST_TIMEOUT_SECS";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The base URL is not an absolute http(s) URL
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// Offending value
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// An environment variable holds something other than whole seconds
    #[error("Invalid value '{value}' for {name}: expected whole seconds")]
    InvalidDuration {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL; paths are appended to it.
    ///
    /// Default: the production API
    pub base_url: String,

    /// Key the session is persisted under.
    ///
    /// Default: `b2bAuth`
    pub storage_key: String,

    /// Tokens this close to expiry are refreshed before use.
    ///
    /// Default: 30 seconds
    pub renewal_margin: TimeDelta,

    /// Timeout applied to every HTTP request.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Path of the sign-in endpoint.
    pub sign_in_path: String,

    /// Path of the refresh endpoint.
    pub refresh_path: String,
}

impl ClientConfig {
    /// Configuration for the given API base with default settings.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(key) = lookup(ENV_STORAGE_KEY) {
            config.storage_key = key;
        }
        if let Some(value) = lookup(ENV_RENEWAL_MARGIN_SECS) {
            let secs = parse_secs(ENV_RENEWAL_MARGIN_SECS, &value)?;
            config.renewal_margin = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .ok_or(ConfigError::InvalidDuration {
                    name: ENV_RENEWAL_MARGIN_SECS,
                    value,
                })?;
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout =
                Duration::from_secs(parse_secs(ENV_REQUEST_TIMEOUT_SECS, &value)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the storage key.
    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set the renewal margin.
    #[must_use]
    pub const fn with_renewal_margin(mut self, margin: TimeDelta) -> Self {
        self.renewal_margin = margin;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check that the base URL is an absolute http(s) URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };
        let url = reqwest::Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(invalid(format!("unsupported scheme '{other}'"))),
        }
    }

    /// Absolute URL for `path` (which may carry a query string).
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            renewal_margin: TimeDelta::seconds(DEFAULT_RENEWAL_MARGIN_SECS),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sign_in_path: "/signin".to_string(),
            refresh_path: "/refresh_token".to_string(),
        }
    }
}

fn parse_secs(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidDuration {
            name,
            value: value.to_string(),
        })
}
