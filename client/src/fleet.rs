//! Fleet API wrappers.
//!
//! Thin typed entry points over [`SessionClient::get`]: they build the
//! endpoint path, check the status and decode the JSON body. The payloads
//! are returned as [`serde_json::Value`]; the dashboard renders them as-is.

use crate::client::SessionClient;
use crate::error::AuthError;
use bit2bit_core::storage::SessionStorage;
use serde_json::Value;
use thiserror::Error;

/// Default page size of the estate plant listing.
pub const DEFAULT_ESTATE_PAGE_SIZE: u32 = 30;

/// Errors from the fleet wrappers.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The session layer failed (not signed in, refresh failed, network)
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The API answered with a non-2xx status
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        /// Path that was requested
        endpoint: String,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The body was not JSON
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// An estate-scoped call was made without an estate id
    #[error("Estate id is required")]
    MissingEstateId,
}

/// Fleet endpoints on top of an authenticated session.
#[derive(Debug, Clone)]
pub struct FleetApi<S: SessionStorage> {
    client: SessionClient<S>,
}

impl<S: SessionStorage> FleetApi<S> {
    /// Wrap a session client.
    #[must_use]
    pub const fn new(client: SessionClient<S>) -> Self {
        Self { client }
    }

    /// The underlying session client.
    #[must_use]
    pub const fn client(&self) -> &SessionClient<S> {
        &self.client
    }

    /// One page of plants (pages start at 1).
    ///
    /// # Errors
    ///
    /// Returns [`FleetError`] if the request fails or the body is not JSON.
    pub async fn plants(&self, page: Option<u32>) -> Result<Value, FleetError> {
        self.get_json(&format!("/plants?page={}", page.unwrap_or(1)))
            .await
    }

    /// Number of plants visible to the user.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError`] if the request fails or the body is not JSON.
    pub async fn plant_count(&self) -> Result<Value, FleetError> {
        self.get_json("/plants/count").await
    }

    /// Number of inverters visible to the user.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError`] if the request fails or the body is not JSON.
    pub async fn inverter_count(&self) -> Result<Value, FleetError> {
        self.get_json("/inverters/count").await
    }

    /// Aggregated production totals for one estate.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::MissingEstateId`] for an empty id, otherwise
    /// [`FleetError`] if the request fails or the body is not JSON.
    pub async fn estate_totals(&self, estate_id: &str) -> Result<Value, FleetError> {
        let estate_id = require_estate_id(estate_id)?;
        self.get_json(&format!("/db/estate-plant-totals/{estate_id}"))
            .await
    }

    /// Plants of one estate that are currently offline.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::MissingEstateId`] for an empty id, otherwise
    /// [`FleetError`] if the request fails or the body is not JSON.
    pub async fn offline_plants(&self, estate_id: &str) -> Result<Value, FleetError> {
        let estate_id = require_estate_id(estate_id)?;
        self.get_json(&format!("/db/offline-plants/{estate_id}"))
            .await
    }

    /// One page of the estate plant listing.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError`] if the request fails or the body is not JSON.
    pub async fn estate_plants(
        &self,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<Value, FleetError> {
        self.get_json(&format!(
            "/db/estate-plants?page={}&page_size={}",
            page.unwrap_or(1),
            page_size.unwrap_or(DEFAULT_ESTATE_PAGE_SIZE)
        ))
        .await
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value, FleetError> {
        let response = self.client.get(endpoint).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint, status = status.as_u16(), "Fleet request failed");
            return Err(FleetError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| FleetError::Decode(e.to_string()))
    }
}

fn require_estate_id(estate_id: &str) -> Result<&str, FleetError> {
    let estate_id = estate_id.trim();
    if estate_id.is_empty() {
        Err(FleetError::MissingEstateId)
    } else {
        Ok(estate_id)
    }
}
