//! # Bit2Bit Core
//!
//! Core traits and types for the Bit2Bit fleet session client.
//!
//! This crate holds the pure part of the token lifecycle: the session model,
//! the state machine that moves it through sign-in, refresh and sign-out, and
//! the environment traits the imperative shell plugs into. Nothing in here
//! performs I/O.
//!
//! ## Core Concepts
//!
//! - **Session**: the access/refresh token pair, its expiry and the user email
//! - **Action**: every input that can change the session (sign-in, refresh, sync, ...)
//! - **Reducer**: pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: description of storage and scheduling work for the shell to run
//! - **Environment**: injected dependencies (the clock, the renewal margin)
//!
//! ## Example
//!
//! ```
//! use bit2bit_core::environment::SystemClock;
//! use bit2bit_core::reducer::Reducer;
//! use bit2bit_core::session::{
//!     SessionAction, SessionEffect, SessionEnvironment, SessionReducer, SessionState, TokenGrant,
//! };
//! use std::sync::Arc;
//!
//! let env = SessionEnvironment::new(Arc::new(SystemClock));
//! let mut state = SessionState::default();
//!
//! let effects = SessionReducer.reduce(
//!     &mut state,
//!     SessionAction::SignedIn {
//!         email: "a@x.com".to_string(),
//!         grant: TokenGrant::new("A1", Some("R1".to_string()), 3600),
//!     },
//!     &env,
//! );
//!
//! assert!(state.is_active());
//! assert!(matches!(effects[0], SessionEffect::Persist(_)));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod session;
pub mod storage;

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all lifecycle rules and are deterministic and testable.
pub mod reducer {
    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Effect`: The effect descriptions this reducer emits
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The effect description type returned to the shell
        type Effect;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Vec<Self::Effect>;
    }
}

/// Environment module - Dependency injection traits
///
/// All time-dependent decisions go through [`Clock`](environment::Clock) so that
/// expiry rules can be exercised deterministically in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use bit2bit_core::environment::{Clock, SystemClock};
    ///
    /// let before = chrono::Utc::now();
    /// assert!(SystemClock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use environment::{Clock, SystemClock};
pub use reducer::Reducer;
pub use session::{
    PersistedSession, Session, SessionAction, SessionEffect, SessionEnvironment, SessionReducer,
    SessionState, TokenGrant,
};
pub use storage::{SessionStorage, StorageError, StorageEvent, StorageEventStream};
