//! # Bit2Bit Session Client
//!
//! Token-lifecycle client for the Bit2Bit solar-fleet API: sign-in,
//! bearer-authenticated requests with transparent refresh, sign-out,
//! persistence of the session, and convergence with other contexts that
//! share the same storage.
//!
//! ## Example
//!
//! ```no_run
//! use bit2bit_client::{ClientConfig, FileStorage, FleetApi, SessionClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // B2B_BASE_URL, B2B_STORAGE_KEY, ... override the defaults
//!     let config = ClientConfig::from_env()?;
//!     let storage = FileStorage::open(".bit2bit").await?;
//!     let client = SessionClient::new(config, storage)?;
//!
//!     if !client.restore().await {
//!         client.sign_in("a@x.com", "p").await?;
//!     }
//!
//!     let fleet = FleetApi::new(client);
//!     println!("{}", fleet.plant_count().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Behaviour
//!
//! - Tokens within the renewal margin (30 s by default) are refreshed before use
//! - Concurrent callers share a single refresh
//! - A 401 answer is retried exactly once after a forced refresh
//! - A rejected refresh ends the session everywhere
//! - A timer refreshes the token ahead of expiry even when idle
//!
//! ## Observability
//!
//! Lifecycle transitions are logged with `tracing`; tokens never are. The
//! `metrics` counters `bit2bit_session_refresh_total{outcome}`,
//! `bit2bit_session_request_retries_total` and
//! `bit2bit_session_sync_events_total` are recorded against whatever
//! recorder the application installs.

pub mod client;
pub mod config;
pub mod error;
pub mod file_storage;
pub mod fleet;
pub mod messages;
pub mod request;

mod gate;
mod renewal;
mod sync;

// Re-export main types for convenience
pub use client::SessionClient;
pub use config::{ClientConfig, ConfigError};
pub use error::AuthError;
pub use file_storage::FileStorage;
pub use fleet::{FleetApi, FleetError};
pub use request::{RequestBody, RequestOptions};

pub use bit2bit_core::session::Session;
pub use bit2bit_core::storage::{SessionStorage, StorageError};
