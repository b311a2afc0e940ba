//! Shared fixtures for the client integration tests.

#![allow(dead_code)] // Not every test binary uses every helper
#![allow(clippy::unwrap_used)] // Test code

use bit2bit_client::{ClientConfig, SessionClient};
use bit2bit_testing::{MemoryStorage, TestClock, init_test_tracing, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Token body as returned by the identity endpoints.
pub fn grant(access_token: &str, refresh_token: Option<&str>, expires_in: u64) -> Value {
    let mut body = json!({ "access_token": access_token, "expires_in": expires_in });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = json!(refresh_token);
    }
    body
}

/// `POST /signin` for `a@x.com` / `p` answering `A1` / `R1`.
pub async fn mount_sign_in(server: &MockServer, expires_in: u64) {
    Mock::given(method("POST"))
        .and(path("/signin"))
        .and(body_json(json!({ "email": "a@x.com", "password": "p" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(grant("A1", Some("R1"), expires_in)))
        .mount(server)
        .await;
}

/// `POST /refresh_token` for `R1` answering `A2` (optionally after a delay).
pub fn refresh_mock(delay: Duration) -> Mock {
    Mock::given(method("POST"))
        .and(path("/refresh_token"))
        .and(body_json(json!({ "refresh_token": "R1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(grant("A2", Some("R2"), 3600))
                .set_delay(delay),
        )
}

/// A server, a storage slot and a client on a frozen clock.
pub struct Harness {
    pub server: MockServer,
    pub storage: MemoryStorage,
    pub clock: Arc<TestClock>,
    pub client: SessionClient<MemoryStorage>,
}

impl Harness {
    pub async fn start() -> Self {
        init_test_tracing();
        let server = MockServer::start().await;
        let storage = MemoryStorage::new();
        let clock = Arc::new(test_clock());
        let client = SessionClient::with_clock(
            ClientConfig::new(server.uri()),
            storage.clone(),
            clock.clone(),
        )
        .unwrap();
        Self {
            server,
            storage,
            clock,
            client,
        }
    }

    /// Another client on a sibling context of the same slot.
    pub fn sibling(&self) -> SessionClient<MemoryStorage> {
        SessionClient::with_clock(
            ClientConfig::new(self.server.uri()),
            self.storage.context(),
            self.clock.clone(),
        )
        .unwrap()
    }

    /// Sign in as `a@x.com` with a token living `expires_in` seconds.
    pub async fn signed_in(expires_in: u64) -> Self {
        let harness = Self::start().await;
        mount_sign_in(&harness.server, expires_in).await;
        harness.client.sign_in("a@x.com", "p").await.unwrap();
        harness
    }

    /// Paths of the requests the server received, in order.
    pub async fn request_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
