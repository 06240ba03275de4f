//! Request pipeline: router, middleware chain, upstream proxy
//!
//! The chain, outermost first: request-id → trace → CORS → security headers
//! → entrypoint (resource match) → session (extraction, refresh, token
//! verification) → admission (roles/groups/claims/headers) → UMA → header
//! injection → proxy. Each stage either writes a response and halts or
//! annotates the request with an extension and calls the next.

pub mod forward_auth;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod server;

pub use server::Gateway;

use std::sync::Arc;

use axum::Json;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::json;

use crate::authz::AuthzEngine;
use crate::config::Config;
use crate::discovery::Discovery;
use crate::headers::HeaderInjector;
use crate::resource::{Resource, ResourceSet};
use crate::session::SessionManager;
use crate::token::Claims;
use crate::uma::UmaClient;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Arc<Config>,
    /// Discovery client with the current JWKS snapshot
    pub discovery: Arc<Discovery>,
    /// Session manager
    pub sessions: Arc<SessionManager>,
    /// Protected resources
    pub resources: Arc<ResourceSet>,
    /// Role/group/claim evaluator
    pub authz: Arc<AuthzEngine>,
    /// UMA client, present when UMA is enabled
    pub uma: Option<Arc<UmaClient>>,
    /// Claim-to-header injector
    pub injector: Arc<HeaderInjector>,
    /// Outbound HTTP client (IdP and upstream)
    pub http: reqwest::Client,
    /// Prometheus exposition handle, present when metrics are enabled
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

/// The target the request is evaluated against; differs from the request
/// line in forward-auth mode, where it comes from `X-Forwarded-*`
#[derive(Clone, Debug)]
pub struct RequestTarget {
    /// Raw (still percent-encoded) request path
    pub path: String,
    /// HTTP method
    pub method: String,
}

/// Resource the entrypoint matched, if any
#[derive(Clone)]
pub struct MatchedResource(
    /// The matched rule; `None` when no rule governs the path
    pub Option<Resource>,
);

/// Verified identity established by the session stage
#[derive(Clone)]
pub struct Identity {
    /// Raw access token
    pub raw: String,
    /// Verified claims
    pub claims: Arc<Claims>,
}

/// Small JSON error document; detail stays in the logs
#[must_use]
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": message,
        })),
    )
        .into_response()
}

/// Response for an unauthenticated request: 401 in no-redirect mode, 303 to
/// the authorize endpoint with the original URI as the return target
#[must_use]
pub fn unauthenticated_response(config: &Config, original_uri: &Uri) -> Response {
    if config.no_redirects {
        return error_response(StatusCode::UNAUTHORIZED, "authentication required");
    }
    let target = utf8_percent_encode(
        &original_uri.to_string(),
        NON_ALPHANUMERIC,
    )
    .to_string();
    let location = format!("{}/authorize?state={target}", config.oauth_prefix());
    redirect_see_other(&location)
}

/// 303 See Other
#[must_use]
pub fn redirect_see_other(location: &str) -> Response {
    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}
