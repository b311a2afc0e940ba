//! # Bit2Bit Testing
//!
//! Testing utilities and helpers for the Bit2Bit fleet session client.
//!
//! This crate provides:
//! - A controllable clock for expiry-margin tests
//! - An in-memory shared storage slot with sibling contexts (cross-context sync)
//! - A Given-When-Then harness for reducers
//! - Tracing initialisation for test output
//!
//! ## Example
//!
//! ```ignore
//! use bit2bit_testing::{MemoryStorage, test_clock};
//!
//! #[tokio::test]
//! async fn test_reload_restores_session() {
//!     let storage = MemoryStorage::new();
//!     let clock = Arc::new(test_clock());
//!     let client = SessionClient::with_clock(config, storage.context(), clock.clone())?;
//!     client.sign_in("a@x.com", "p").await?;
//!
//!     clock.advance(chrono::TimeDelta::minutes(59));
//!     // ...
//! }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use bit2bit_core::environment::Clock;

pub mod memory_storage;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, TimeDelta, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Controllable clock for deterministic tests
    ///
    /// Returns the same time until moved with [`TestClock::set`] or
    /// [`TestClock::advance`].
    ///
    /// # Example
    ///
    /// ```
    /// use bit2bit_testing::mocks::TestClock;
    /// use bit2bit_core::environment::Clock;
    /// use chrono::{TimeDelta, Utc};
    ///
    /// let clock = TestClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(TimeDelta::seconds(10));
    /// assert_eq!(clock.now() - time1, TimeDelta::seconds(10));
    /// ```
    #[derive(Debug)]
    pub struct TestClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl TestClock {
        /// Create a new clock frozen at the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Jump to an absolute time
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward (or backward, with a negative delta)
        pub fn advance(&self, delta: TimeDelta) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default test clock (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> TestClock {
        TestClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber for test output.
///
/// Honours `RUST_LOG`, defaults to debug output for the session crates, and
/// is safe to call from every test (only the first call installs).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bit2bit_client=debug,bit2bit_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use memory_storage::MemoryStorage;
pub use mocks::{TestClock, test_clock};
pub use reducer_test::ReducerTest;
