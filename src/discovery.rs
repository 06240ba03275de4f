//! OIDC discovery
//!
//! Fetches the provider's discovery document and JWKS at startup (with a
//! bounded retry loop) and republishes them as an immutable snapshot behind
//! an `RwLock<Arc<_>>`. Readers clone the `Arc` and never observe a partial
//! update; a refresh publishes a whole new snapshot.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// OIDC discovery document, the subset the gateway uses
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer URL tokens must carry
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// JWKS URI
    pub jwks_uri: String,
    /// End-session endpoint (optional)
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    /// Token revocation endpoint (optional)
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    /// UMA permission endpoint (optional; derived for Keycloak when absent)
    #[serde(default)]
    pub permission_endpoint: Option<String>,
    /// UMA resource registration endpoint (optional; derived when absent)
    #[serde(default)]
    pub resource_registration_endpoint: Option<String>,
}

impl DiscoveryDocument {
    /// UMA resource registry endpoint, derived from the issuer when the
    /// document does not advertise one (Keycloak path layout)
    #[must_use]
    pub fn resource_registry(&self) -> String {
        self.resource_registration_endpoint.clone().unwrap_or_else(|| {
            format!(
                "{}/authz/protection/resource_set",
                self.issuer.trim_end_matches('/')
            )
        })
    }

    /// UMA permission ticket endpoint
    #[must_use]
    pub fn permission_ticket(&self) -> String {
        self.permission_endpoint.clone().unwrap_or_else(|| {
            format!(
                "{}/authz/protection/permission",
                self.issuer.trim_end_matches('/')
            )
        })
    }
}

/// One consistent view of the provider: document plus signing keys
pub struct DiscoverySnapshot {
    /// Discovery document
    pub document: DiscoveryDocument,
    /// Current signing key set
    pub keys: JwkSet,
}

/// Discovery client holding the current snapshot
pub struct Discovery {
    http: Client,
    discovery_url: String,
    snapshot: RwLock<Arc<DiscoverySnapshot>>,
}

impl Discovery {
    /// Fetch the discovery document and JWKS, retrying up to `retries`
    /// times before giving up. Failure here is fatal at startup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Idp`] when the provider stays unreachable or serves
    /// an invalid document after all attempts.
    pub async fn bootstrap(http: Client, discovery_url: &str, retries: u32) -> Result<Self> {
        let mut attempt = 0;
        let snapshot = loop {
            match fetch_snapshot(&http, discovery_url).await {
                Ok(snapshot) => break snapshot,
                Err(err) if attempt < retries => {
                    attempt += 1;
                    warn!(error = %err, attempt, retries, "discovery failed, retrying");
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt).min(5))).await;
                }
                Err(err) => return Err(err),
            }
        };

        info!(issuer = %snapshot.document.issuer, keys = snapshot.keys.keys.len(), "discovery complete");

        Ok(Self {
            http,
            discovery_url: discovery_url.to_string(),
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Current snapshot; cheap, never blocks on a refresh in progress
    #[must_use]
    pub fn snapshot(&self) -> Arc<DiscoverySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Re-fetch the document and keys and publish a new snapshot.
    ///
    /// Called when verification fails with an unknown `kid`, which usually
    /// means the provider rotated its keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Idp`] when the provider is unreachable; the previous
    /// snapshot stays in place.
    pub async fn refresh(&self) -> Result<()> {
        let fresh = fetch_snapshot(&self.http, &self.discovery_url).await?;
        debug!(keys = fresh.keys.keys.len(), "published fresh discovery snapshot");
        *self.snapshot.write() = Arc::new(fresh);
        Ok(())
    }
}

async fn fetch_snapshot(http: &Client, discovery_url: &str) -> Result<DiscoverySnapshot> {
    let response = http
        .get(discovery_url)
        .send()
        .await
        .map_err(|e| Error::Idp(format!("discovery fetch failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::Idp(format!(
            "discovery fetch failed: HTTP {}",
            response.status()
        )));
    }

    let document: DiscoveryDocument = response
        .json()
        .await
        .map_err(|e| Error::Idp(format!("invalid discovery document: {e}")))?;

    let keys = fetch_jwks(http, &document.jwks_uri).await?;

    Ok(DiscoverySnapshot { document, keys })
}

/// Fetch the JWKS, skipping keys that fail to parse rather than rejecting
/// the whole set (providers routinely publish keys with exotic parameters)
async fn fetch_jwks(http: &Client, jwks_uri: &str) -> Result<JwkSet> {
    #[derive(Deserialize)]
    struct RawJwkSet {
        keys: Vec<serde_json::Value>,
    }

    let raw: RawJwkSet = http
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| Error::Idp(format!("jwks fetch failed: {e}")))?
        .json()
        .await
        .map_err(|e| Error::Idp(format!("invalid jwks: {e}")))?;

    let mut set = JwkSet { keys: Vec::new() };
    for key in raw.keys {
        match serde_json::from_value(key) {
            Ok(parsed) => set.keys.push(parsed),
            Err(err) => warn!(error = %err, "skipping non-decodable JWK"),
        }
    }
    Ok(set)
}
