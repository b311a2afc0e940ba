//! Request options for authenticated calls.

use crate::error::AuthError;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder};

/// Body of an authenticated request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `Content-Type: application/json`
    Json(serde_json::Value),
    /// Sent as-is
    Text(String),
    /// Sent as-is
    Bytes(Vec<u8>),
}

impl RequestBody {
    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Json(value) => builder.json(value),
            Self::Text(text) => builder.body(text.clone()),
            Self::Bytes(bytes) => builder.body(bytes.clone()),
        }
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Method, headers and body of an authenticated request.
///
/// Kept by value so the request can be replayed after a 401.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    method: Method,
    headers: HeaderMap,
    body: Option<RequestBody>,
}

impl RequestOptions {
    /// Options for `method` with no headers and no body.
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Add a header. An `Authorization` header is accepted but always
    /// replaced by the session's bearer token.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Merge a whole header map.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Build the request with `token` as the bearer credential.
    pub(crate) fn build(
        &self,
        http: &reqwest::Client,
        url: &str,
        token: &str,
    ) -> Result<RequestBuilder, AuthError> {
        let builder = http
            .request(self.method.clone(), url)
            .headers(authorized_headers(&self.headers, token)?);
        Ok(match &self.body {
            Some(body) => body.apply(builder),
            None => builder,
        })
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

/// Caller headers with the bearer header forced in.
fn authorized_headers(headers: &HeaderMap, token: &str) -> Result<HeaderMap, AuthError> {
    let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
    bearer.set_sensitive(true);

    let mut merged = headers.clone();
    merged.remove(AUTHORIZATION);
    merged.insert(AUTHORIZATION, bearer);
    Ok(merged)
}
