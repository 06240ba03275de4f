//! UMA 2.0 authorization
//!
//! When UMA is enabled the engine first honors a cached RPT from the session
//! covering the matched resource and scopes. Otherwise it walks the
//! ticket-to-RPT exchange: probe the provider's resource registry by URI,
//! request a permission ticket under the protection API token, exchange the
//! ticket at the token endpoint with the `uma-ticket` grant, and verify the
//! resulting RPT. A denial surfaces the ticket via `WWW-Authenticate` so
//! client-driven flows can continue on their own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::discovery::DiscoverySnapshot;
use crate::token::{Claims, TokenCodec, VerifyPolicy};
use crate::{Error, Result};

/// UMA ticket grant type (RFC draft, used by Keycloak)
pub const UMA_TICKET_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Outcome of a UMA evaluation
pub enum UmaVerdict {
    /// Permission granted; the RPT should be cached in the session
    Granted {
        /// The raw RPT to store in the UMA cookie
        rpt: String,
        /// Decoded RPT claims
        claims: Box<Claims>,
    },
    /// Permission denied; the ticket, when present, is surfaced to the client
    Denied {
        /// Permission ticket for client-driven flows
        ticket: Option<String>,
        /// What failed
        reason: Error,
    },
}

#[derive(Debug, Deserialize)]
struct ResourceRepresentation {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    resource_scopes: Vec<ScopeRepresentation>,
}

#[derive(Debug, Deserialize)]
struct ScopeRepresentation {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    ticket: String,
}

#[derive(Debug, Deserialize)]
struct RptResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct PatResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// UMA client holding the cached protection API token
pub struct UmaClient {
    http: reqwest::Client,
    config: Arc<Config>,
    // protection API token with its expiry instant
    pat: RwLock<Option<(String, Instant)>>,
}

impl UmaClient {
    /// Create a client
    pub fn new(http: reqwest::Client, config: Arc<Config>) -> Self {
        Self {
            http,
            config,
            pat: RwLock::new(None),
        }
    }

    /// Whether a cached RPT covers the subject, resource path and scopes.
    ///
    /// An RPT is reusable while it is unexpired, belongs to the same
    /// subject, and one of its permissions names the resource with every
    /// required scope granted.
    #[must_use]
    pub fn rpt_covers(
        rpt_claims: &Claims,
        subject: &str,
        resource_id: &str,
        required_scopes: &[String],
    ) -> bool {
        if rpt_claims.is_expired() {
            return false;
        }
        if rpt_claims.sub != subject {
            return false;
        }
        rpt_claims.permissions().iter().any(|perm| {
            perm.rsid == resource_id
                && required_scopes
                    .iter()
                    .all(|scope| perm.scopes.iter().any(|s| s == scope))
        })
    }

    /// Check a session RPT against the request without a ticket exchange.
    ///
    /// The matched resource is resolved by URI against the provider's
    /// registry (under the protection token) and the RPT must carry a
    /// permission for exactly that resource id with every required scope,
    /// so a grant cached for one resource can never be replayed against
    /// another. Registry errors report no coverage and the caller falls
    /// through to the full exchange.
    pub async fn cached_rpt_grants(
        &self,
        snapshot: &DiscoverySnapshot,
        rpt_claims: &Claims,
        subject: &str,
        path: &str,
        method: &str,
    ) -> bool {
        if rpt_claims.is_expired() || rpt_claims.sub != subject {
            return false;
        }
        let Ok(pat) = self.protection_token(snapshot).await else {
            return false;
        };
        let Ok(resource) = self.find_resource(snapshot, &pat, path).await else {
            return false;
        };
        let required: Vec<String> = if self.config.enable_uma_method_scope {
            vec![method.to_string()]
        } else {
            resource
                .resource_scopes
                .iter()
                .map(|s| s.name.clone())
                .collect()
        };
        Self::rpt_covers(rpt_claims, subject, &resource.id, &required)
    }

    /// Run the full ticket-to-RPT exchange for `(path, method)` on behalf of
    /// the request's access token.
    pub async fn evaluate(
        &self,
        snapshot: &DiscoverySnapshot,
        access_token: &str,
        subject: &str,
        path: &str,
        method: &str,
    ) -> UmaVerdict {
        match self.exchange(snapshot, access_token, subject, path, method).await {
            Ok(verdict) => verdict,
            Err(reason) => UmaVerdict::Denied {
                ticket: None,
                reason,
            },
        }
    }

    async fn exchange(
        &self,
        snapshot: &DiscoverySnapshot,
        access_token: &str,
        subject: &str,
        path: &str,
        method: &str,
    ) -> Result<UmaVerdict> {
        let pat = self.protection_token(snapshot).await?;

        let resource = self.find_resource(snapshot, &pat, path).await?;

        let scopes: Vec<String> = if self.config.enable_uma_method_scope {
            let has_method_scope = resource
                .resource_scopes
                .iter()
                .any(|s| s.name == method);
            if !has_method_scope {
                return Err(Error::MissingScopesForResource(path.to_string()));
            }
            vec![method.to_string()]
        } else {
            resource
                .resource_scopes
                .iter()
                .map(|s| s.name.clone())
                .collect()
        };

        let ticket = self
            .permission_ticket(snapshot, &pat, &resource.id, &scopes)
            .await?;

        let rpt = match self.rpt_exchange(snapshot, access_token, &ticket).await {
            Ok(rpt) => rpt,
            Err(reason) => {
                return Ok(UmaVerdict::Denied {
                    ticket: Some(ticket),
                    reason,
                });
            }
        };

        // the RPT audience is the requesting client, not the proxy's
        // client-id; issuer and expiry are still enforced
        let policy = VerifyPolicy {
            issuer: snapshot.document.issuer.clone(),
            client_id: self.config.client_id.clone(),
            skip_issuer_check: self.config.skip_access_token_issuer_check,
            skip_client_id_check: true,
        };
        let claims = TokenCodec::verify(&rpt, &snapshot.keys, &policy)?;

        if claims.sub != subject {
            return Ok(UmaVerdict::Denied {
                ticket: Some(ticket),
                reason: Error::AccessMismatchUmaToken,
            });
        }

        if !Self::rpt_covers(&claims, subject, &resource.id, &scopes) {
            return Ok(UmaVerdict::Denied {
                ticket: Some(ticket),
                reason: Error::RetrieveRpt,
            });
        }

        debug!(path = %path, resource = %resource.id, "uma permission granted");
        Ok(UmaVerdict::Granted {
            rpt,
            claims: Box::new(claims),
        })
    }

    // ── protocol steps ─────────────────────────────────────────────────

    /// Protection API token via client credentials, cached until shortly
    /// before expiry
    async fn protection_token(&self, snapshot: &DiscoverySnapshot) -> Result<String> {
        if let Some((token, expires_at)) = self.pat.read().clone() {
            if Instant::now() < expires_at {
                return Ok(token);
            }
        }

        let response = self
            .http
            .post(&snapshot.document.token_endpoint)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("pat request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Idp(format!(
                "pat request failed: HTTP {}",
                response.status()
            )));
        }

        let pat: PatResponse = response
            .json()
            .await
            .map_err(|e| Error::Idp(format!("invalid pat response: {e}")))?;

        let lifetime = Duration::from_secs(pat.expires_in.unwrap_or(60).saturating_sub(10).max(10));
        *self.pat.write() = Some((pat.access_token.clone(), Instant::now() + lifetime));
        Ok(pat.access_token)
    }

    async fn find_resource(
        &self,
        snapshot: &DiscoverySnapshot,
        pat: &str,
        path: &str,
    ) -> Result<ResourceRepresentation> {
        let registry = snapshot.document.resource_registry();

        let ids: Vec<String> = self
            .http
            .get(&registry)
            .query(&[("uri", path), ("matchingUri", "true"), ("max", "1")])
            .bearer_auth(pat)
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("resource query failed: {e}")))?
            .json()
            .await
            .map_err(|_| Error::NoIdpResourceForPath(path.to_string()))?;

        let id = ids
            .first()
            .ok_or_else(|| Error::NoIdpResourceForPath(path.to_string()))?;

        self.http
            .get(format!("{registry}/{id}"))
            .bearer_auth(pat)
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("resource fetch failed: {e}")))?
            .json()
            .await
            .map_err(|_| Error::NoIdpResourceForPath(path.to_string()))
    }

    async fn permission_ticket(
        &self,
        snapshot: &DiscoverySnapshot,
        pat: &str,
        resource_id: &str,
        scopes: &[String],
    ) -> Result<String> {
        let body = serde_json::json!([{
            "resource_id": resource_id,
            "resource_scopes": scopes,
        }]);

        let response = self
            .http
            .post(snapshot.document.permission_ticket())
            .bearer_auth(pat)
            .json(&body)
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("ticket request failed: {e}")))?;

        if !response.status().is_success() {
            warn!(resource = %resource_id, status = %response.status(), "permission ticket refused");
            return Err(Error::PermissionTicket(resource_id.to_string()));
        }

        let ticket: TicketResponse = response
            .json()
            .await
            .map_err(|_| Error::PermissionTicket(resource_id.to_string()))?;
        Ok(ticket.ticket)
    }

    async fn rpt_exchange(
        &self,
        snapshot: &DiscoverySnapshot,
        access_token: &str,
        ticket: &str,
    ) -> Result<String> {
        let response = self
            .http
            .post(&snapshot.document.token_endpoint)
            .bearer_auth(access_token)
            .form(&[
                ("grant_type", UMA_TICKET_GRANT),
                ("ticket", ticket),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("rpt exchange failed: {e}")))?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "rpt exchange refused");
            return Err(Error::RetrieveRpt);
        }

        let rpt: RptResponse = response.json().await.map_err(|_| Error::RetrieveRpt)?;
        Ok(rpt.access_token)
    }
}

/// Render the `WWW-Authenticate` value carrying a permission ticket
#[must_use]
pub fn www_authenticate(realm: &str, ticket: &str) -> String {
    format!("UMA realm=\"{realm}\", ticket=\"{ticket}\"")
}

/// Extract the ticket from a `WWW-Authenticate: UMA …` header value
#[must_use]
pub fn parse_ticket(header: &str) -> Option<String> {
    if !header.trim_start().starts_with("UMA") {
        return None;
    }
    header.split("ticket=").nth(1).map(|rest| {
        rest.trim_start_matches('"')
            .trim_end_matches(|c| c == '"' || c == ',' || c == ' ')
            .to_string()
    })
}
