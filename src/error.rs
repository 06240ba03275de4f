//! Error types for oidc-gateway

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for oidc-gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors, grouped by the pipeline stage they occur in
#[derive(Error, Debug)]
pub enum Error {
    // -- configuration (fatal at startup) ------------------------------------
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery URL malformed
    #[error("bad discovery url format: {0}")]
    BadDiscoveryUriFormat(String),

    /// Encryption key is not exactly 32 bytes
    #[error("encryption key must be exactly 32 bytes, got {0}")]
    InvalidEncryptionKeyLength(usize),

    /// Default-deny requested while everything is whitelisted
    #[error("default denial requested but everything is whitelisted")]
    DefaultDenyWhitelistConflict,

    /// Default-deny enabled together with user-defined rules for /*
    #[error("default deny enabled while user-defined rules exist for /*")]
    DefaultDenyUserDefinedConflict,

    /// PKCE requires the interactive code flow
    #[error("pkce can be enabled only with no-redirects=false")]
    PkceWithCodeFlowOnly,

    // -- authentication ------------------------------------------------------
    /// Token has zero length
    #[error("token has zero length")]
    ZeroLengthToken,

    /// Token signature or claims verification failed
    #[error("token verification failed")]
    TokenVerificationFailure,

    /// Refresh token has expired
    #[error("refresh token has expired")]
    RefreshTokenExpired,

    /// Authentication session not found (missing state cookie)
    #[error("authentication session not found")]
    SessionNotFound,

    /// No session state found in the store
    #[error("no session state found")]
    NoSessionStateFound,

    /// PKCE verifier cookie is empty
    #[error("pkce code verifier cookie value is empty")]
    PkceCookieEmpty,

    /// Failed to decrypt a sealed token
    #[error("failed to decrypt token")]
    Decryption,

    // -- authorization -------------------------------------------------------
    /// No IdP resource matches the request path
    #[error("could not find idp resource matching path: {0}")]
    NoIdpResourceForPath(String),

    /// IdP resource carries no scopes
    #[error("missing scopes for resource in idp provider: {0}")]
    MissingScopesForResource(String),

    /// Permission ticket acquisition failed
    #[error("problem getting permission ticket for resource {0}")]
    PermissionTicket(String),

    /// RPT exchange failed
    #[error("problem getting RPT for resource (are permissions assigned to the resource?)")]
    RetrieveRpt,

    /// RPT subject does not match the session subject
    #[error("access token and uma token subject don't match")]
    AccessMismatchUmaToken,

    /// Cached UMA token expired
    #[error("uma token expired")]
    UmaTokenExpired,

    // -- protocol ------------------------------------------------------------
    /// Forward-auth mode without the X-Forwarded-* headers from the front proxy
    #[error(
        "forward-auth requires X-Forwarded-Proto, X-Forwarded-Host and X-Forwarded-URI from the front proxy"
    )]
    ForwardAuthMissingHeaders,

    /// state parameter did not match the request-state cookie
    #[error("state mismatch between query and cookie")]
    StateMismatch,

    // -- transport -----------------------------------------------------------
    /// Identity provider unreachable or answered with an error
    #[error("identity provider error: {0}")]
    Idp(String),

    /// Token store unavailable
    #[error("token store error: {0}")]
    Store(String),

    /// Upstream connection error
    #[error("upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// HTTP status this error maps to when it terminates a request
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ZeroLengthToken
            | Self::TokenVerificationFailure
            | Self::RefreshTokenExpired
            | Self::SessionNotFound
            | Self::NoSessionStateFound
            | Self::PkceCookieEmpty
            | Self::StateMismatch
            | Self::Decryption => StatusCode::UNAUTHORIZED,

            Self::NoIdpResourceForPath(_)
            | Self::MissingScopesForResource(_)
            | Self::PermissionTicket(_)
            | Self::RetrieveRpt
            | Self::AccessMismatchUmaToken
            | Self::UmaTokenExpired
            | Self::ForwardAuthMissingHeaders => StatusCode::FORBIDDEN,

            Self::Idp(_) | Self::Upstream(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is fatal at startup
    #[must_use]
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::BadDiscoveryUriFormat(_)
                | Self::InvalidEncryptionKeyLength(_)
                | Self::DefaultDenyWhitelistConflict
                | Self::DefaultDenyUserDefinedConflict
                | Self::PkceWithCodeFlowOnly
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_errors_map_to_401() {
        assert_eq!(
            Error::ZeroLengthToken.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::TokenVerificationFailure.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::Decryption.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn authorization_errors_map_to_403() {
        assert_eq!(Error::RetrieveRpt.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::ForwardAuthMissingHeaders.status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn transport_errors_map_to_502() {
        assert_eq!(
            Error::Idp("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Upstream("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn config_errors_are_fatal() {
        assert!(Error::PkceWithCodeFlowOnly.is_fatal_config());
        assert!(Error::InvalidEncryptionKeyLength(16).is_fatal_config());
        assert!(!Error::ZeroLengthToken.is_fatal_config());
    }
}
