//! Sign-in, sign-out, persistence and request decoration.

#![allow(clippy::unwrap_used)] // Test code

mod common;

use bit2bit_client::{AuthError, ClientConfig, RequestOptions, SessionClient};
use bit2bit_core::environment::Clock;
use bit2bit_testing::MemoryStorage;
use chrono::TimeDelta;
use common::{Harness, mount_sign_in};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_sign_in_populates_and_persists_session() {
    let harness = Harness::start().await;
    mount_sign_in(&harness.server, 3600).await;
    let signed_in_at = harness.clock.now();

    harness.client.sign_in("a@x.com", "p").await.unwrap();

    let session = harness.client.session_snapshot().unwrap();
    assert_eq!(session.access_token, "A1");
    assert_eq!(session.refresh_token.as_deref(), Some("R1"));
    assert_eq!(session.user_email, "a@x.com");
    assert_eq!(session.token_expiry, signed_in_at + TimeDelta::seconds(3600));
    assert!(harness.client.is_authenticated());
    assert_eq!(harness.client.current_user_email().as_deref(), Some("a@x.com"));

    let persisted: serde_json::Value =
        serde_json::from_str(&harness.storage.raw("b2bAuth").unwrap()).unwrap();
    assert_eq!(persisted["accessToken"], "A1");
    assert_eq!(persisted["refreshToken"], "R1");
    assert_eq!(
        persisted["tokenExpiry"],
        session.token_expiry.timestamp_millis()
    );
    assert_eq!(persisted["user"]["email"], "a@x.com");
}

#[tokio::test]
async fn test_rejected_sign_in_surfaces_server_message() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/signin"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid email or password"))
        .mount(&harness.server)
        .await;

    let err = harness.client.sign_in("a@x.com", "wrong").await.unwrap_err();

    assert_eq!(
        err,
        AuthError::InvalidCredentials {
            status: 401,
            message: "Invalid email or password".to_string(),
        }
    );
    assert!(!harness.client.is_authenticated());
    assert_eq!(harness.storage.raw("b2bAuth"), None);
}

#[tokio::test]
async fn test_failed_sign_in_keeps_existing_session() {
    let harness = Harness::signed_in(3600).await;
    Mock::given(method("POST"))
        .and(path("/signin"))
        .and(body_json(json!({ "email": "b@x.com", "password": "bad" })))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .mount(&harness.server)
        .await;

    assert!(harness.client.sign_in("b@x.com", "bad").await.is_err());
    assert_eq!(harness.client.current_user_email().as_deref(), Some("a@x.com"));
}

#[tokio::test]
async fn test_sign_in_with_malformed_body_is_invalid_response() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/signin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&harness.server)
        .await;

    let err = harness.client.sign_in("a@x.com", "p").await.unwrap_err();
    assert_eq!(err.reason(), "invalid_response");
    assert!(!harness.client.is_authenticated());
}

#[tokio::test]
async fn test_sign_out_clears_memory_and_storage() {
    let harness = Harness::signed_in(3600).await;

    harness.client.sign_out().await;

    assert!(!harness.client.is_authenticated());
    assert!(harness.client.session_snapshot().is_none());
    assert_eq!(harness.storage.raw("b2bAuth"), None);
    assert_eq!(
        harness.client.get("/plants").await.unwrap_err(),
        AuthError::NotAuthenticated
    );
}

#[tokio::test]
async fn test_request_carries_bearer_token() {
    let harness = Harness::signed_in(3600).await;
    Mock::given(method("GET"))
        .and(path("/plants/count"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 12 })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let response = harness.client.get("/plants/count").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.json::<serde_json::Value>().await.unwrap(),
        json!({ "count": 12 })
    );
}

#[tokio::test]
async fn test_caller_cannot_override_authorization() {
    let harness = Harness::signed_in(3600).await;
    Mock::given(method("DELETE"))
        .and(path("/plants/7"))
        .and(header("authorization", "Bearer A1"))
        .and(header("x-request-id", "abc"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&harness.server)
        .await;

    let options = RequestOptions::new(Method::DELETE)
        .header(AUTHORIZATION, HeaderValue::from_static("Bearer forged"))
        .header(
            reqwest::header::HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("abc"),
        );
    let response = harness
        .client
        .authenticated_request("/plants/7", options)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_json_body_is_sent() {
    let harness = Harness::signed_in(3600).await;
    Mock::given(method("POST"))
        .and(path("/plants"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({ "name": "North field" })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&harness.server)
        .await;

    let response = harness
        .client
        .post("/plants", json!({ "name": "North field" }))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_non_401_errors_pass_through() {
    let harness = Harness::signed_in(3600).await;
    Mock::given(method("GET"))
        .and(path("/plants"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&harness.server)
        .await;

    let response = harness.client.get("/plants").await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.client.is_authenticated());
    assert!(!harness.request_paths().await.contains(&"/refresh_token".to_string()));
}

#[tokio::test]
async fn test_reload_restores_identical_session() {
    let harness = Harness::signed_in(3600).await;
    let before = harness.client.session_snapshot().unwrap();

    let reloaded = harness.sibling();
    Mock::given(method("GET"))
        .and(path("/plants/count"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&harness.server)
        .await;

    assert!(!reloaded.is_authenticated());
    let response = reloaded.get("/plants/count").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(reloaded.session_snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_corrupted_persisted_session_is_deleted() {
    let storage = MemoryStorage::new();
    storage.put_raw("b2bAuth", "{not json");
    let client = SessionClient::new(ClientConfig::default(), storage.context()).unwrap();

    assert_eq!(
        client.get("/plants").await.unwrap_err(),
        AuthError::NotAuthenticated
    );
    assert_eq!(storage.raw("b2bAuth"), None);
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn test_custom_storage_key() {
    let harness = Harness::start().await;
    mount_sign_in(&harness.server, 3600).await;
    let client = SessionClient::new(
        ClientConfig::new(harness.server.uri()).with_storage_key("otherKey"),
        harness.storage.context(),
    )
    .unwrap();

    client.sign_in("a@x.com", "p").await.unwrap();

    assert!(harness.storage.raw("otherKey").is_some());
    assert_eq!(harness.storage.raw("b2bAuth"), None);
}
