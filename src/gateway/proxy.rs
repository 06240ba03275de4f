//! Upstream forwarder
//!
//! The last stage of the chain: injects the identity headers and relays the
//! request to the configured upstream, streaming both bodies. In no-proxy
//! (forward-auth) mode there is no upstream; the decision is returned to the
//! front proxy with the verified `Authorization` header on the response.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tracing::{debug, warn};

use super::{AppState, Identity, error_response};

/// Hop-by-hop headers never forwarded in either direction
const HOP_BY_HOP: &[header::HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// Terminal handler: forward upstream, or answer the forward-auth decision
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response {
    let identity = request.extensions().get::<Identity>().cloned();

    if state.config.no_proxy {
        return forward_auth_response(identity.as_ref());
    }

    let Some(ref upstream) = state.config.upstream_url else {
        return error_response(StatusCode::BAD_GATEWAY, "no upstream configured");
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), ToString::to_string);
    let url = format!("{}{path_and_query}", upstream.trim_end_matches('/'));

    let mut headers = HeaderMap::new();
    for (name, value) in request.headers() {
        if HOP_BY_HOP.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(host) = request.headers().get(header::HOST) {
        headers.insert("x-forwarded-host", host.clone());
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));

    if let Some(ref identity) = identity {
        state
            .injector
            .inject(&mut headers, &identity.claims, &identity.raw);
    } else if !state.config.enable_authorization_header {
        // an anonymous pass-through must not smuggle a client-supplied
        // Authorization header upstream
        headers.remove(header::AUTHORIZATION);
    }

    let method = request.method().clone();
    let body = reqwest::Body::wrap_stream(request.into_body().into_data_stream());

    let upstream_response = match state
        .http
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, url = %url, "upstream request failed");
            counter!("gateway_upstream_errors_total").increment(1);
            return error_response(StatusCode::BAD_GATEWAY, "upstream unavailable");
        }
    };

    counter!("gateway_requests_forwarded_total").increment(1);
    debug!(status = %upstream_response.status(), url = %url, "forwarded");

    let mut builder = Response::builder().status(upstream_response.status());
    for (name, value) in upstream_response.headers() {
        if HOP_BY_HOP.contains(name) {
            continue;
        }
        builder = builder.header(name, value);
    }

    let stream = upstream_response.bytes_stream();
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| error_response(StatusCode::BAD_GATEWAY, "invalid upstream response"))
}

fn forward_auth_response(identity: Option<&Identity>) -> Response {
    let mut response = (StatusCode::OK, "OK").into_response();
    if let Some(identity) = identity {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", identity.raw)) {
            response.headers_mut().insert(header::AUTHORIZATION, value);
        }
    }
    counter!("gateway_requests_forwarded_total").increment(1);
    response
}
