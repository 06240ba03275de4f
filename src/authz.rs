//! Authorization engine
//!
//! Evaluates a verified token against a matched resource in a fixed order,
//! short-circuiting on the first failing gate: method, roles, groups, claim
//! predicates, required headers. UMA evaluation is a separate, asynchronous
//! stage layered on top by the middleware chain.

use std::fmt;

use axum::http::HeaderMap;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::resource::Resource;
use crate::token::Claims;

/// Tri-valued authorization outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzDecision {
    /// Access granted
    Allowed,
    /// Access denied
    Denied,
    /// No rule applied; resolved by the default policy
    Undefined,
}

impl fmt::Display for AuthzDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Denied => write!(f, "denied"),
            Self::Undefined => write!(f, "undefined"),
        }
    }
}

/// Role/group/claim/header evaluator with a compiled-regex cache
#[derive(Default)]
pub struct AuthzEngine {
    regex_cache: DashMap<String, Regex>,
}

impl AuthzEngine {
    /// Create an engine with an empty regex cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the non-UMA gates for a matched resource
    #[must_use]
    pub fn evaluate(
        &self,
        resource: &Resource,
        claims: &Claims,
        method: &str,
        headers: &HeaderMap,
    ) -> AuthzDecision {
        if !resource.matches_method(method) {
            debug!(method = %method, resource = %resource.url, "method not permitted");
            return AuthzDecision::Denied;
        }

        if !self.check_roles(resource, claims) {
            debug!(resource = %resource.url, "role check failed");
            return AuthzDecision::Denied;
        }

        if !check_groups(resource, claims) {
            debug!(resource = %resource.url, "group check failed");
            return AuthzDecision::Denied;
        }

        if !self.check_claims(resource, claims) {
            debug!(resource = %resource.url, "claim predicate failed");
            return AuthzDecision::Denied;
        }

        if !check_headers(resource, headers) {
            debug!(resource = %resource.url, "required header missing");
            return AuthzDecision::Denied;
        }

        AuthzDecision::Allowed
    }

    fn check_roles(&self, resource: &Resource, claims: &Claims) -> bool {
        if resource.roles.is_empty() {
            return true;
        }
        let held = claims.roles();
        if resource.require_any_role {
            resource.roles.iter().any(|r| held.contains(r))
        } else {
            resource.roles.iter().all(|r| held.contains(r))
        }
    }

    fn check_claims(&self, resource: &Resource, claims: &Claims) -> bool {
        for (name, pattern) in &resource.match_claims {
            let Some(value) = claims.claim(name) else {
                return false;
            };
            let Some(regex) = self.compiled(pattern) else {
                return false;
            };
            let matched = match value {
                Value::String(s) => regex.is_match(&s),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|s| regex.is_match(s)),
                other => regex.is_match(&other.to_string()),
            };
            if !matched {
                return false;
            }
        }
        true
    }

    fn compiled(&self, pattern: &str) -> Option<Regex> {
        if let Some(regex) = self.regex_cache.get(pattern) {
            return Some(regex.clone());
        }
        match Regex::new(pattern) {
            Ok(regex) => {
                self.regex_cache
                    .insert(pattern.to_string(), regex.clone());
                Some(regex)
            }
            Err(err) => {
                debug!(pattern = %pattern, error = %err, "invalid claim regex");
                None
            }
        }
    }
}

fn check_groups(resource: &Resource, claims: &Claims) -> bool {
    if resource.groups.is_empty() {
        return true;
    }
    resource
        .groups
        .iter()
        .any(|g| claims.groups.iter().any(|held| held == g))
}

fn check_headers(resource: &Resource, headers: &HeaderMap) -> bool {
    for required in &resource.headers {
        let Some((name, expected)) = required.split_once(':') else {
            return false;
        };
        let Some(actual) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        if !expected.is_empty() && actual != expected {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: serde_json::Value) -> Claims {
        serde_json::from_value(value).unwrap()
    }

    fn user() -> Claims {
        claims(json!({
            "sub": "user-1",
            "exp": 4_000_000_000u64,
            "realm_access": {"roles": ["user", "tester"]},
            "resource_access": {"test-client": {"roles": ["admin"]}},
            "groups": ["/admins", "/users"],
            "iss": "https://idp/realms/test"
        }))
    }

    fn resource(dsl: &str) -> Resource {
        Resource::parse(dsl).unwrap()
    }

    // ── method gate ────────────────────────────────────────────────────

    #[test]
    fn method_outside_set_is_denied() {
        let engine = AuthzEngine::new();
        let r = resource("uri=/x|methods=GET");
        assert_eq!(
            engine.evaluate(&r, &user(), "POST", &HeaderMap::new()),
            AuthzDecision::Denied
        );
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Allowed
        );
    }

    // ── roles ──────────────────────────────────────────────────────────

    #[test]
    fn all_roles_required_by_default() {
        let engine = AuthzEngine::new();
        let r = resource("uri=/x|roles=user,tester");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Allowed
        );

        let r = resource("uri=/x|roles=user,missing");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Denied
        );
    }

    #[test]
    fn require_any_role_accepts_one_match() {
        let engine = AuthzEngine::new();
        let r = resource("uri=/x|roles=missing,tester|require-any-role=true");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Allowed
        );

        let r = resource("uri=/x|roles=missing,also-missing|require-any-role=true");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Denied
        );
    }

    #[test]
    fn client_roles_use_qualified_names() {
        let engine = AuthzEngine::new();
        let r = resource("uri=/x|roles=test-client:admin");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Allowed
        );
    }

    // ── groups ─────────────────────────────────────────────────────────

    #[test]
    fn any_group_match_suffices() {
        let engine = AuthzEngine::new();
        let r = resource("uri=/x|groups=/admins,/other");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Allowed
        );

        let r = resource("uri=/x|groups=/other");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Denied
        );
    }

    // ── claim predicates ───────────────────────────────────────────────

    #[test]
    fn scalar_claim_matches_regex() {
        let engine = AuthzEngine::new();
        let mut r = resource("uri=/x");
        r.match_claims
            .insert("iss".to_string(), "^https://idp".to_string());
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Allowed
        );

        r.match_claims
            .insert("iss".to_string(), "^https://other".to_string());
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Denied
        );
    }

    #[test]
    fn array_claim_matches_any_element() {
        let engine = AuthzEngine::new();
        let mut r = resource("uri=/x");
        r.match_claims
            .insert("groups".to_string(), "^/admins$".to_string());
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Allowed
        );
    }

    #[test]
    fn missing_claim_is_denied() {
        let engine = AuthzEngine::new();
        let mut r = resource("uri=/x");
        r.match_claims
            .insert("department".to_string(), ".*".to_string());
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Denied
        );
    }

    // ── required headers ───────────────────────────────────────────────

    #[test]
    fn required_header_with_value() {
        let engine = AuthzEngine::new();
        let r = resource("uri=/x|headers=x-team:platform");

        let mut headers = HeaderMap::new();
        headers.insert("x-team", "platform".parse().unwrap());
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &headers),
            AuthzDecision::Allowed
        );

        let mut wrong = HeaderMap::new();
        wrong.insert("x-team", "other".parse().unwrap());
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &wrong),
            AuthzDecision::Denied
        );

        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Denied
        );
    }

    // ── short-circuit order ────────────────────────────────────────────

    #[test]
    fn method_gate_runs_before_roles() {
        let engine = AuthzEngine::new();
        // role check would pass, method must still deny
        let r = resource("uri=/x|methods=POST|roles=user");
        assert_eq!(
            engine.evaluate(&r, &user(), "GET", &HeaderMap::new()),
            AuthzDecision::Denied
        );
    }
}
