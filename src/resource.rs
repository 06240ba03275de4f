//! Protected resources and request matching
//!
//! A [`Resource`] binds a URL pattern and method set to an authorization
//! policy. Resources are parsed from the `uri=…|methods=…|roles=…` DSL at
//! startup, validated against the registered method set, and matched at
//! request time on the raw (still percent-encoded) path: longest matching
//! prefix wins, ties broken by declaration order.

use std::collections::HashMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// HTTP methods registered by default
pub const DEFAULT_HTTP_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

/// A protection rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// URL pattern: a prefix with an optional trailing `*` wildcard
    pub url: String,
    /// Allowed methods; empty means every registered method
    pub methods: Vec<String>,
    /// Roles the token must carry
    pub roles: Vec<String>,
    /// Groups the token must belong to (any match suffices)
    pub groups: Vec<String>,
    /// Any single role from `roles` suffices instead of all of them
    pub require_any_role: bool,
    /// Claim predicates, claim name to regex source
    pub match_claims: HashMap<String, String>,
    /// Skip every auth check for this resource
    pub white_listed: bool,
    /// Headers that must be present on the request, name to value
    pub headers: Vec<String>,
    /// Evaluate UMA for this resource
    pub uma_enabled: bool,
}

impl Resource {
    /// Parse one DSL entry, e.g.
    /// `uri=/admin|methods=GET,POST|roles=admin|require-any-role=true`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown keys, a missing or relative
    /// `uri`, malformed booleans, or malformed header entries.
    pub fn parse(dsl: &str) -> Result<Self> {
        let mut resource = Self::default();

        for pair in dsl.split('|') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid resource option: {pair}")))?;

            match key {
                "uri" => {
                    if !value.starts_with('/') {
                        return Err(Error::Config(format!(
                            "resource uri must start with '/': {value}"
                        )));
                    }
                    resource.url = value.to_string();
                }
                "methods" => {
                    if value.eq_ignore_ascii_case("any") {
                        resource.methods.clear();
                    } else {
                        resource.methods = value
                            .split(',')
                            .map(|m| m.trim().to_ascii_uppercase())
                            .collect();
                    }
                }
                "roles" => {
                    resource.roles = value.split(',').map(|r| r.trim().to_string()).collect();
                }
                "groups" => {
                    resource.groups = value.split(',').map(|g| g.trim().to_string()).collect();
                }
                "require-any-role" => {
                    resource.require_any_role = parse_bool(key, value)?;
                }
                "white-listed" => {
                    resource.white_listed = parse_bool(key, value)?;
                }
                "uma" => {
                    resource.uma_enabled = parse_bool(key, value)?;
                }
                "headers" => {
                    for header in value.split(',') {
                        if !header.contains(':') {
                            return Err(Error::Config(format!(
                                "resource header must be name:value, got: {header}"
                            )));
                        }
                        resource.headers.push(header.trim().to_string());
                    }
                }
                other => {
                    return Err(Error::Config(format!("unknown resource option: {other}")));
                }
            }
        }

        if resource.url.is_empty() {
            return Err(Error::Config("resource requires a uri".to_string()));
        }

        Ok(resource)
    }

    /// Validate against the registered method set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty URL, a trailing-slash URL, or
    /// a method outside the registered set.
    pub fn valid(&self, registered_methods: &[String]) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config("resource has an empty uri".to_string()));
        }
        if self.url != "/" && !self.url.ends_with("/*") && self.url.ends_with('/') {
            return Err(Error::Config(format!(
                "resource uri must not end with '/': {}",
                self.url
            )));
        }
        for method in &self.methods {
            if !registered_methods.iter().any(|m| m == method) {
                return Err(Error::Config(format!(
                    "resource {} uses unregistered method {method}",
                    self.url
                )));
            }
        }
        Ok(())
    }

    /// The literal prefix this resource matches on
    #[must_use]
    fn prefix(&self) -> &str {
        self.url.strip_suffix('*').unwrap_or(&self.url)
    }

    /// Whether this resource matches the raw request path
    #[must_use]
    pub fn matches_path(&self, path: &str) -> bool {
        if self.url.ends_with('*') {
            let prefix = self.prefix();
            // "/pets/*" also covers "/pets" itself
            path.starts_with(prefix) || path == prefix.trim_end_matches('/')
        } else {
            path == self.url
        }
    }

    /// Whether this resource allows the method
    #[must_use]
    pub fn matches_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m == method)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uri: {}", self.url)?;
        if !self.methods.is_empty() {
            write!(f, ", methods: {}", self.methods.join(","))?;
        }
        if !self.roles.is_empty() {
            write!(f, ", roles: {}", self.roles.join(","))?;
        }
        if self.white_listed {
            write!(f, ", white-listed")?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{key} must be true or false, got: {value}")))
}

/// Ordered set of protection rules with deterministic matching
#[derive(Debug)]
pub struct ResourceSet {
    resources: Vec<Resource>,
}

impl ResourceSet {
    /// Build from parsed resources.
    ///
    /// With default-deny a catch-all authentication-only guard is
    /// synthesized; combining default-deny with user-defined `/*` rules is a
    /// configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DefaultDenyWhitelistConflict`],
    /// [`Error::DefaultDenyUserDefinedConflict`], or the first resource
    /// validation error.
    pub fn new(
        mut resources: Vec<Resource>,
        default_deny: bool,
        custom_methods: &[String],
        global_match_claims: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut registered: Vec<String> =
            DEFAULT_HTTP_METHODS.iter().map(ToString::to_string).collect();
        registered.extend(custom_methods.iter().cloned());

        for resource in &resources {
            resource.valid(&registered)?;
        }

        if default_deny {
            for resource in &resources {
                if resource.url == "/*" {
                    if resource.white_listed {
                        return Err(Error::DefaultDenyWhitelistConflict);
                    }
                    return Err(Error::DefaultDenyUserDefinedConflict);
                }
            }
            resources.push(Resource {
                url: "/*".to_string(),
                ..Resource::default()
            });
        }

        if !global_match_claims.is_empty() {
            for resource in &mut resources {
                for (claim, regex) in global_match_claims {
                    resource
                        .match_claims
                        .entry(claim.clone())
                        .or_insert_with(|| regex.clone());
                }
            }
        }

        Ok(Self { resources })
    }

    /// Select the resource governing `(path, method)`: longest matching
    /// prefix wins, ties broken by declaration order
    #[must_use]
    pub fn matching(&self, path: &str, method: &str) -> Option<&Resource> {
        let mut best: Option<(&Resource, usize)> = None;
        for resource in &self.resources {
            if !resource.matches_path(path) || !resource.matches_method(method) {
                continue;
            }
            let specificity = resource.prefix().len();
            match best {
                Some((_, len)) if len >= specificity => {}
                _ => best = Some((resource, specificity)),
            }
        }
        best.map(|(resource, _)| resource)
    }

    /// All resources, in declaration order
    #[must_use]
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }
}

/// Whether the raw path contains sequences the proxy refuses to match:
/// a doubled slash, or a segment that percent-decodes to `.` or `..`
#[must_use]
pub fn is_suspicious_path(path: &str) -> bool {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return false;
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    for (idx, segment) in segments.iter().enumerate() {
        // a trailing slash leaves one empty final segment, which is fine
        if segment.is_empty() && idx + 1 != segments.len() {
            return true;
        }
        let decoded = percent_decode_str(segment).decode_utf8_lossy();
        if decoded == ".." || decoded == "." {
            return true;
        }
    }
    false
}

/// Lexically normalized form of a suspicious path, used as the redirect
/// target in interactive mode. Percent-encoding inside segments is
/// preserved verbatim; only empty and dot segments are resolved.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        let decoded = percent_decode_str(segment).decode_utf8_lossy();
        if decoded == "." {
            continue;
        }
        if decoded == ".." {
            out.pop();
            continue;
        }
        out.push(segment);
    }
    format!("/{}", out.join("/"))
}
