//! Wire bodies of the identity endpoints.
//!
//! Both endpoints answer with a [`TokenGrant`](bit2bit_core::session::TokenGrant).

use serde::Serialize;

/// `POST /signin` body.
#[derive(Serialize)]
pub struct SignInRequest<'a> {
    /// Account email
    pub email: &'a str,
    /// Account password
    pub password: &'a str,
}

impl std::fmt::Debug for SignInRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `POST /refresh_token` body.
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    /// Current refresh token
    pub refresh_token: &'a str,
}
