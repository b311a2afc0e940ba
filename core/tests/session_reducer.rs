//! Session lifecycle transitions driven through the reducer harness.

#![allow(clippy::unwrap_used, clippy::panic)] // Test code

use bit2bit_core::session::{
    PersistedSession, Session, SessionAction, SessionEffect, SessionEnvironment, SessionReducer,
    SessionState, TokenGrant,
};
use bit2bit_core::Reducer;
use bit2bit_testing::reducer_test::assertions;
use bit2bit_testing::{ReducerTest, TestClock, test_clock};
use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;

fn env() -> (Arc<TestClock>, SessionEnvironment) {
    let clock = Arc::new(test_clock());
    let env = SessionEnvironment::new(clock.clone());
    (clock, env)
}

fn signed_in_state(env: &SessionEnvironment) -> SessionState {
    let mut state = SessionState::default();
    SessionReducer.reduce(
        &mut state,
        SessionAction::SignedIn {
            email: "a@x.com".to_string(),
            grant: TokenGrant::new("A1", Some("R1".to_string()), 3600),
        },
        env,
    );
    state
}

fn other_session(env: &SessionEnvironment) -> Session {
    Session::from_grant(
        TokenGrant::new("A9", Some("R9".to_string()), 600),
        "b@x.com",
        env.now(),
    )
}

#[test]
fn test_sign_in_persists_and_schedules_renewal() {
    let (_, env) = env();
    let expected_expiry = env.now() + TimeDelta::seconds(3600);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(SessionState::default())
        .when_action(SessionAction::SignedIn {
            email: "a@x.com".to_string(),
            grant: TokenGrant::new("A1", Some("R1".to_string()), 3600),
        })
        .then_state(move |state| {
            let session = state.session.as_ref().unwrap();
            assert_eq!(session.access_token, "A1");
            assert_eq!(session.refresh_token.as_deref(), Some("R1"));
            assert_eq!(session.user_email, "a@x.com");
            assert_eq!(session.token_expiry, expected_expiry);
            assert_eq!(state.generation, 1);
        })
        .then_effects(|effects| {
            assertions::assert_effects_count(effects, 2);
            let SessionEffect::Persist(record) = &effects[0] else {
                panic!("expected Persist first, got {effects:?}");
            };
            assert_eq!(record.access_token.as_deref(), Some("A1"));
            assert_eq!(
                effects[1],
                SessionEffect::ScheduleRenewal {
                    delay: Duration::from_secs(3570),
                    generation: 1,
                }
            );
        })
        .run();
}

#[test]
fn test_sign_in_with_short_lifetime_cancels_timer() {
    let (_, env) = env();

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(SessionState::default())
        .when_action(SessionAction::SignedIn {
            email: "a@x.com".to_string(),
            grant: TokenGrant::new("A1", Some("R1".to_string()), 10),
        })
        .then_state(|state| assert!(state.is_active()))
        .then_effects(|effects| {
            assert_eq!(effects[1], SessionEffect::CancelRenewal);
        })
        .run();
}

#[test]
fn test_refresh_replaces_token_and_keeps_email() {
    let (clock, env) = env();
    let state = signed_in_state(&env);
    clock.advance(TimeDelta::seconds(3590));
    let expected_expiry = env.now() + TimeDelta::seconds(3600);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::Refreshed {
            generation: 1,
            grant: TokenGrant::new("A2", None, 3600),
        })
        .then_state(move |state| {
            let session = state.session.as_ref().unwrap();
            assert_eq!(session.access_token, "A2");
            assert_eq!(session.refresh_token.as_deref(), Some("R1"));
            assert_eq!(session.user_email, "a@x.com");
            assert_eq!(session.token_expiry, expected_expiry);
            assert_eq!(state.generation, 2);
        })
        .then_effects(|effects| {
            assertions::assert_has_effect(effects, |e| matches!(e, SessionEffect::Persist(_)));
            assertions::assert_has_effect(effects, |e| {
                matches!(e, SessionEffect::ScheduleRenewal { generation: 2, .. })
            });
        })
        .run();
}

#[test]
fn test_stale_refresh_is_discarded() {
    let (_, env) = env();
    let mut state = signed_in_state(&env);
    SessionReducer.reduce(&mut state, SessionAction::SignedOut, &env);
    let generation = state.generation;

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::Refreshed {
            generation: 1,
            grant: TokenGrant::new("A2", Some("R2".to_string()), 3600),
        })
        .then_state(move |state| {
            assert!(!state.is_active());
            assert_eq!(state.generation, generation);
        })
        .then_effects(|effects| assertions::assert_no_effects(effects))
        .run();
}

#[test]
fn test_refresh_rejection_destroys_session() {
    let (_, env) = env();
    let state = signed_in_state(&env);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::RefreshRejected { generation: 1 })
        .then_state(|state| assert!(!state.is_active()))
        .then_effects_eq(vec![SessionEffect::CancelRenewal, SessionEffect::RemovePersisted])
        .run();
}

#[test]
fn test_stale_rejection_keeps_newer_session() {
    let (_, env) = env();
    let mut state = signed_in_state(&env);
    let replacement = other_session(&env);
    SessionReducer.reduce(
        &mut state,
        SessionAction::ExternalChange {
            session: Some(replacement),
        },
        &env,
    );

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::RefreshRejected { generation: 1 })
        .then_state(|state| {
            assert_eq!(state.session.as_ref().unwrap().access_token, "A9");
        })
        .then_effects(|effects| assertions::assert_no_effects(effects))
        .run();
}

#[test]
fn test_sign_out_clears_everything() {
    let (_, env) = env();
    let state = signed_in_state(&env);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::SignedOut)
        .then_state(|state| {
            assert!(state.session.is_none());
            assert_eq!(state.generation, 2);
        })
        .then_effects_eq(vec![SessionEffect::CancelRenewal, SessionEffect::RemovePersisted])
        .run();
}

#[test]
fn test_sign_out_without_session_is_idempotent() {
    let (_, env) = env();

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(SessionState::default())
        .when_action(SessionAction::SignedOut)
        .then_state(|state| assert!(!state.is_active()))
        .then_effects_eq(vec![SessionEffect::CancelRenewal, SessionEffect::RemovePersisted])
        .run();
}

#[test]
fn test_restore_does_not_write_back() {
    let (_, env) = env();
    let restored = other_session(&env);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(SessionState::default())
        .when_action(SessionAction::Restored {
            generation: 0,
            session: restored,
        })
        .then_state(|state| {
            assert_eq!(state.session.as_ref().unwrap().user_email, "b@x.com");
        })
        .then_effects(|effects| {
            assert!(!effects.iter().any(|e| matches!(e, SessionEffect::Persist(_))));
            assertions::assert_has_effect(effects, |e| {
                matches!(e, SessionEffect::ScheduleRenewal { .. })
            });
        })
        .run();
}

#[test]
fn test_restore_is_ignored_when_session_loaded() {
    let (_, env) = env();
    let state = signed_in_state(&env);
    let restored = other_session(&env);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::Restored {
            generation: 1,
            session: restored,
        })
        .then_state(|state| {
            assert_eq!(state.session.as_ref().unwrap().access_token, "A1");
            assert_eq!(state.generation, 1);
        })
        .then_effects(|effects| assertions::assert_no_effects(effects))
        .run();
}

#[test]
fn test_restore_read_before_sign_out_is_discarded() {
    let (_, env) = env();
    let mut state = SessionState::default();
    SessionReducer.reduce(&mut state, SessionAction::SignedOut, &env);
    let restored = other_session(&env);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::Restored {
            generation: 0,
            session: restored,
        })
        .then_state(|state| {
            assert!(!state.is_active());
            assert_eq!(state.generation, 1);
        })
        .then_effects(|effects| assertions::assert_no_effects(effects))
        .run();
}

#[test]
fn test_external_change_adopts_sibling_tokens() {
    let (_, env) = env();
    let state = signed_in_state(&env);
    let sibling = other_session(&env);
    let expected = sibling.clone();

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::ExternalChange {
            session: Some(sibling),
        })
        .then_state(move |state| {
            assert_eq!(state.session.as_ref(), Some(&expected));
            assert_eq!(state.generation, 2);
        })
        .then_effects(|effects| {
            assert!(!effects.iter().any(|e| matches!(e, SessionEffect::Persist(_))));
        })
        .run();
}

#[test]
fn test_external_removal_signs_out_locally() {
    let (_, env) = env();
    let state = signed_in_state(&env);

    ReducerTest::new(SessionReducer)
        .with_env(env)
        .given_state(state)
        .when_action(SessionAction::ExternalChange { session: None })
        .then_state(|state| assert!(!state.is_active()))
        .then_effects_eq(vec![SessionEffect::CancelRenewal])
        .run();
}

#[test]
fn test_persisted_record_roundtrips_session() {
    let (_, env) = env();
    let state = signed_in_state(&env);
    let session = state.session.unwrap();

    let raw = PersistedSession::from(&session).encode().unwrap();
    let decoded = PersistedSession::decode(&raw).unwrap().unwrap();

    assert_eq!(decoded, session);
}
