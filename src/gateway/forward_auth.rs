//! Forward-auth target reconstruction
//!
//! In no-proxy mode the gateway fronts nothing itself; a front proxy asks it
//! for an allow/deny decision and forwards the original request target in
//! `X-Forwarded-*` headers. On success the response carries the verified
//! `Authorization` header for the front proxy to apply upstream.

use axum::http::HeaderMap;

use super::RequestTarget;
use crate::{Error, Result};

fn forwarded(headers: &HeaderMap, name: &'static str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Reconstruct the request target from the forwarded headers.
///
/// # Errors
///
/// Returns [`Error::ForwardAuthMissingHeaders`] when `X-Forwarded-Proto`,
/// `X-Forwarded-Host` or `X-Forwarded-URI` is absent. The method defaults
/// to `GET` when `X-Forwarded-Method` is absent; callers needing the real
/// method (UMA method scopes) must check [`RequestTarget::method`] against
/// [`has_forwarded_method`].
pub fn target(headers: &HeaderMap) -> Result<RequestTarget> {
    let _proto =
        forwarded(headers, "x-forwarded-proto").ok_or(Error::ForwardAuthMissingHeaders)?;
    let _host = forwarded(headers, "x-forwarded-host").ok_or(Error::ForwardAuthMissingHeaders)?;
    let uri = forwarded(headers, "x-forwarded-uri").ok_or(Error::ForwardAuthMissingHeaders)?;

    let path = uri.split('?').next().unwrap_or("/").to_string();
    let method = forwarded(headers, "x-forwarded-method")
        .map(|m| m.to_ascii_uppercase())
        .unwrap_or_else(|| "GET".to_string());

    Ok(RequestTarget { path, method })
}

/// Whether the front proxy forwarded the original method
#[must_use]
pub fn has_forwarded_method(headers: &HeaderMap) -> bool {
    forwarded(headers, "x-forwarded-method").is_some()
}
