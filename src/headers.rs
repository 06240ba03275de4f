//! Upstream header injection
//!
//! Copies identity claims from the verified token into `X-Auth-*` headers on
//! the upstream request, plus any operator-configured `claim|Header-Name`
//! mappings and static headers.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::token::Claims;

/// Claim-to-header injector built once at startup
pub struct HeaderInjector {
    config: Arc<Config>,
    // parsed "claim|Header-Name" mappings
    mappings: Vec<(String, HeaderName)>,
}

impl HeaderInjector {
    /// Parse the configured mappings; malformed entries are skipped with a log
    pub fn new(config: Arc<Config>) -> Self {
        let mut mappings = Vec::new();
        for entry in &config.add_claims {
            let (claim, header) = match entry.split_once('|') {
                Some((claim, header)) => (claim.to_string(), header),
                // bare claim maps to X-Auth-<Claim>
                None => (entry.clone(), ""),
            };
            let header_name = if header.is_empty() {
                format!("x-auth-{}", claim.replace('_', "-"))
            } else {
                header.to_ascii_lowercase()
            };
            match HeaderName::try_from(header_name.as_str()) {
                Ok(name) => mappings.push((claim, name)),
                Err(_) => debug!(entry = %entry, "skipping invalid claim mapping"),
            }
        }
        Self { config, mappings }
    }

    /// Write the identity headers for a verified token
    pub fn inject(&self, headers: &mut HeaderMap, claims: &Claims, raw_token: &str) {
        set(headers, "x-auth-subject", &claims.sub);
        set(
            headers,
            "x-auth-userid",
            claims.preferred_username.as_deref().unwrap_or(&claims.sub),
        );
        if let Some(ref email) = claims.email {
            set(headers, "x-auth-email", email);
        }
        if let Some(ref username) = claims.preferred_username {
            set(headers, "x-auth-username", username);
        }
        if let Some(ref given) = claims.given_name {
            set(headers, "x-auth-given-name", given);
        }
        if let Some(ref family) = claims.family_name {
            set(headers, "x-auth-family-name", family);
        }
        set(headers, "x-auth-roles", &claims.roles().join(","));
        set(headers, "x-auth-groups", &claims.groups.join(","));
        set(
            headers,
            "x-auth-expires-in",
            &claims.expires_in().to_string(),
        );

        for (claim, header_name) in &self.mappings {
            if let Some(value) = claims.claim(claim) {
                let rendered = render(&value);
                if let Ok(header_value) = HeaderValue::from_str(&rendered) {
                    headers.insert(header_name.clone(), header_value);
                }
            }
        }

        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.to_ascii_lowercase().as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        if self.config.enable_authorization_header {
            set(headers, "authorization", &format!("Bearer {raw_token}"));
        }
        if self.config.enable_token_header {
            set(headers, "x-auth-token", raw_token);
        }
    }
}

fn set(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(header_value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), header_value);
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
