//! Claim bag carried by access and ID tokens
//!
//! Keycloak-shaped claims are modelled explicitly (realm and client roles,
//! groups, UMA permissions); everything else is kept in an open map so claim
//! predicates can match operator-defined claims.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audience: a single string or an array of strings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Audience {
    /// Single audience
    One(String),
    /// Multiple audiences
    Many(Vec<String>),
}

impl Audience {
    /// Whether the audience contains the given client id
    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|a| a == client_id),
        }
    }
}

/// Realm-level role container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleContainer {
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
}

/// One granted UMA permission inside an RPT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UmaPermission {
    /// Resource id
    #[serde(default)]
    pub rsid: String,
    /// Resource name
    #[serde(default)]
    pub rsname: String,
    /// Granted scopes
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// UMA authorization claim (`authorization.permissions`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UmaAuthorization {
    /// Granted permissions
    #[serde(default)]
    pub permissions: Vec<UmaPermission>,
}

/// Decoded token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject
    #[serde(default)]
    pub sub: String,
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Audience
    #[serde(default)]
    pub aud: Option<Audience>,
    /// Expiry, seconds since the epoch
    #[serde(default)]
    pub exp: u64,
    /// Not-before, seconds since the epoch
    #[serde(default)]
    pub nbf: Option<u64>,
    /// Issued-at, seconds since the epoch
    #[serde(default)]
    pub iat: Option<u64>,
    /// Nonce bound during the code flow
    #[serde(default)]
    pub nonce: Option<String>,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Preferred username
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// Given name
    #[serde(default)]
    pub given_name: Option<String>,
    /// Family name
    #[serde(default)]
    pub family_name: Option<String>,
    /// Realm roles
    #[serde(default)]
    pub realm_access: Option<RoleContainer>,
    /// Client roles, keyed by client id
    #[serde(default)]
    pub resource_access: HashMap<String, RoleContainer>,
    /// Group memberships
    #[serde(default)]
    pub groups: Vec<String>,
    /// UMA permissions (present in RPTs)
    #[serde(default)]
    pub authorization: Option<UmaAuthorization>,
    /// Everything else, for claim predicates
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Claims {
    /// All roles: realm roles plus client roles qualified as `client:role`
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        let mut roles: Vec<String> = self
            .realm_access
            .as_ref()
            .map(|r| r.roles.clone())
            .unwrap_or_default();
        for (client, container) in &self.resource_access {
            for role in &container.roles {
                roles.push(format!("{client}:{role}"));
            }
        }
        roles
    }

    /// Whether the token expiry has passed, with the given skew
    #[must_use]
    pub fn is_expired_within(&self, skew_secs: u64) -> bool {
        unix_now() + skew_secs >= self.exp
    }

    /// Whether the token expiry has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_within(0)
    }

    /// Seconds until expiry, zero when already expired
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        self.exp.saturating_sub(unix_now())
    }

    /// Look up a claim by name across the explicit fields and the open bag
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<Value> {
        match name {
            "sub" => Some(Value::String(self.sub.clone())),
            "iss" => Some(Value::String(self.iss.clone())),
            "email" => self.email.clone().map(Value::String),
            "preferred_username" => self.preferred_username.clone().map(Value::String),
            "given_name" => self.given_name.clone().map(Value::String),
            "family_name" => self.family_name.clone().map(Value::String),
            "groups" => Some(Value::Array(
                self.groups.iter().cloned().map(Value::String).collect(),
            )),
            _ => self.extra.get(name).cloned(),
        }
    }

    /// Granted UMA permissions, empty for non-RPT tokens
    #[must_use]
    pub fn permissions(&self) -> &[UmaPermission] {
        self.authorization
            .as_ref()
            .map(|a| a.permissions.as_slice())
            .unwrap_or_default()
    }
}
