//! HTTP router and endpoint handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::middleware::{
    admission_middleware, entrypoint_middleware, session_middleware, uma_middleware,
};
use super::proxy::proxy_handler;
use super::{AppState, error_response};
use crate::config::CorsConfig;
use crate::oauth::{authorize_handler, callback_handler, logout_handler};
use crate::token::TokenCodec;

/// Create the main router: proxy-owned endpoints plus the middleware chain
/// ending in the upstream forwarder
pub fn create_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.oauth_prefix();

    let proxy_chain = Router::new()
        .fallback(proxy_handler)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            uma_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            admission_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            session_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            entrypoint_middleware,
        ));

    let mut router = Router::new()
        .route(&format!("{prefix}/authorize"), get(authorize_handler))
        .route(&format!("{prefix}/callback"), get(callback_handler))
        .route(&format!("{prefix}/logout"), get(logout_handler))
        .route(&format!("{prefix}/health"), get(health_handler));

    if state.config.enable_metrics && state.config.listen_admin.is_none() {
        router = router.route(&format!("{prefix}/metrics"), get(metrics_handler));
    }

    if state.config.enable_session_diagnostics {
        router = router
            .route(&format!("{prefix}/expired"), get(expired_handler))
            .route(&format!("{prefix}/token"), get(token_handler));
    }

    // layers wrap inside-out: request-id ends up outermost, then tracing,
    // CORS, and the security headers closest to the handlers
    let mut router = router
        .merge(proxy_chain)
        .layer(middleware::from_fn(security_headers_middleware));

    if !state.config.cors.origins.is_empty() {
        router = router.layer(cors_layer(&state.config.cors));
    }

    router
        .layer(CompressionLayer::new())
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Create the admin router: health and metrics on a separate listener
pub fn create_admin_router(state: Arc<AppState>) -> Router {
    let prefix = state.config.oauth_prefix();
    let mut router = Router::new().route(&format!("{prefix}/health"), get(health_handler));
    if state.config.enable_metrics {
        router = router.route(&format!("{prefix}/metrics"), get(metrics_handler));
    }
    router.with_state(state)
}

// ── infrastructure middleware ──────────────────────────────────────────

/// Tag the request and response with an `X-Request-ID`
async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        return response;
    }
    next.run(request).await
}

/// Conservative browser security headers on every response
async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let mut layer = CorsLayer::new().allow_origin(AllowOrigin::list(origins));

    if config.methods.is_empty() {
        layer = layer.allow_methods([Method::GET, Method::POST]);
    } else {
        let methods: Vec<Method> = config
            .methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        layer = layer.allow_methods(methods);
    }
    if !config.headers.is_empty() {
        let names: Vec<header::HeaderName> = config
            .headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        layer = layer.allow_headers(names);
    }
    if config.credentials {
        layer = layer.allow_credentials(true);
    }
    if config.max_age > 0 {
        layer = layer.max_age(std::time::Duration::from_secs(config.max_age));
    }
    layer
}

// ── endpoint handlers ──────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics {
        Some(ref handle) => (StatusCode::OK, handle.render()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "metrics disabled"),
    }
}

/// Diagnostic: report whether the presented token is expired
async fn expired_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request<Body>,
) -> Response {
    match extract_claims(&state, &jar, &request) {
        Some(claims) => Json(json!({
            "expired": claims.is_expired(),
            "expires_in": claims.expires_in(),
        }))
        .into_response(),
        None => error_response(StatusCode::UNAUTHORIZED, "no token presented"),
    }
}

/// Diagnostic: masked view of the presented token's claims
async fn token_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request<Body>,
) -> Response {
    match extract_claims(&state, &jar, &request) {
        Some(claims) => Json(json!({
            "subject": claims.sub,
            "username": claims.preferred_username,
            "roles": claims.roles(),
            "groups": claims.groups,
            "expires_in": claims.expires_in(),
        }))
        .into_response(),
        None => error_response(StatusCode::UNAUTHORIZED, "no token presented"),
    }
}

fn extract_claims(
    state: &Arc<AppState>,
    jar: &CookieJar,
    request: &Request<Body>,
) -> Option<crate::token::Claims> {
    let raw = state
        .sessions
        .extract_access_token(request.headers(), jar, &HashMap::new())
        .ok()
        .flatten()?;
    TokenCodec::parse(&raw).ok()
}
