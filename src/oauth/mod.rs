//! Authorization Code flow
//!
//! Handlers for the proxy-owned `/oauth/*` endpoints plus the token-endpoint
//! wire types shared with the session manager and the forwarding client.

mod flow;
mod pkce;

pub use flow::{authorize_handler, callback_handler, logout_handler};
pub use pkce::{generate_pkce, generate_state};

use serde::Deserialize;

/// Token endpoint response (code exchange, refresh, grants)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Refresh token, when the grant issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// ID token, present on code exchange
    #[serde(default)]
    pub id_token: Option<String>,
    /// Token type, usually "Bearer"
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token lifetime in seconds
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
}
