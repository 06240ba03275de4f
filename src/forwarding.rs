//! Outbound forwarding proxy
//!
//! In forwarding mode the gateway is on the client side: it listens locally,
//! acquires a token from the identity provider (`client_credentials` or
//! `password` grant), refreshes it proactively and injects
//! `Authorization: Bearer` into every outbound request. With UMA enabled, a
//! 401/403 carrying a `WWW-Authenticate: UMA … ticket=…` challenge is
//! answered by exchanging the ticket for an RPT, retrying once, and caching
//! the RPT per `(method, URL)`.
//!
//! Per-target authentication state is an explicit machine:
//!
//! ```text
//! NoToken ── acquire ──▶ AccessToken ── uma challenge ──▶ Rpt
//!                    ▲                                     │
//!                    └──────────── 401 (rpt rejected) ◀────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Router;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::{Config, GrantType};
use crate::discovery::Discovery;
use crate::oauth::TokenResponse;
use crate::uma::{UMA_TICKET_GRANT, parse_ticket};
use crate::{Error, Result};

/// Authentication state for one outbound target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAuth {
    /// Nothing acquired yet
    NoToken,
    /// Using the service-account / user access token
    AccessToken,
    /// Using an RPT previously granted for this target
    Rpt(String),
}

struct CachedToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Instant,
}

/// Token-injecting outbound client
pub struct ForwardingClient {
    http: reqwest::Client,
    config: Arc<Config>,
    discovery: Arc<Discovery>,
    token: RwLock<Option<CachedToken>>,
    targets: DashMap<String, TargetAuth>,
}

impl ForwardingClient {
    /// Create the client
    pub fn new(http: reqwest::Client, config: Arc<Config>, discovery: Arc<Discovery>) -> Self {
        Self {
            http,
            config,
            discovery,
            token: RwLock::new(None),
            targets: DashMap::new(),
        }
    }

    /// Current state for a target, [`TargetAuth::NoToken`] when unseen
    #[must_use]
    pub fn target_state(&self, key: &str) -> TargetAuth {
        self.targets
            .get(key)
            .map(|s| s.clone())
            .unwrap_or(TargetAuth::NoToken)
    }

    /// A valid access token, acquired or refreshed as needed.
    ///
    /// The cached token is reused until `forwarding_token_margin` seconds
    /// before expiry, then refreshed (or re-acquired when refresh fails).
    pub async fn access_token(&self) -> Result<String> {
        if let Some(ref cached) = *self.token.read() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let refresh_token = self
            .token
            .read()
            .as_ref()
            .and_then(|c| c.refresh_token.clone());

        if let Some(refresh_token) = refresh_token {
            if let Ok(tokens) = self.refresh(&refresh_token).await {
                return Ok(self.cache(&tokens));
            }
            debug!("refresh failed, re-acquiring from scratch");
        }

        let tokens = self.acquire().await?;
        Ok(self.cache(&tokens))
    }

    fn cache(&self, tokens: &TokenResponse) -> String {
        let lifetime = tokens
            .expires_in
            .unwrap_or(60)
            .saturating_sub(self.config.forwarding_token_margin)
            .max(10);
        *self.token.write() = Some(CachedToken {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        tokens.access_token.clone()
    }

    async fn acquire(&self) -> Result<TokenResponse> {
        let snapshot = self.discovery.snapshot();
        let mut form = vec![
            ("client_id", self.config.client_id.clone()),
            ("client_secret", self.config.client_secret.clone()),
        ];
        match self.config.forwarding_grant_type {
            GrantType::ClientCredentials => {
                form.push(("grant_type", "client_credentials".to_string()));
            }
            GrantType::Password => {
                form.push(("grant_type", "password".to_string()));
                form.push((
                    "username",
                    self.config.forwarding_username.clone().unwrap_or_default(),
                ));
                form.push((
                    "password",
                    self.config.forwarding_password.clone().unwrap_or_default(),
                ));
            }
        }

        let response = self
            .http
            .post(&snapshot.document.token_endpoint)
            .form(&form)
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("token acquisition failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Idp(format!(
                "token acquisition failed: HTTP {}",
                response.status()
            )));
        }

        info!(grant = ?self.config.forwarding_grant_type, "acquired forwarding token");
        response
            .json()
            .await
            .map_err(|e| Error::Idp(format!("invalid token response: {e}")))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let snapshot = self.discovery.snapshot();
        let response = self
            .http
            .post(&snapshot.document.token_endpoint)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .timeout(self.config.idp_timeout())
            .send()
            .await
            .map_err(|e| Error::Idp(format!("refresh failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::RefreshTokenExpired);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Idp(format!("invalid refresh response: {e}")))
    }

    /// Forward one request, driving the per-target state machine
    pub async fn forward(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: reqwest::header::HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let key = format!("{method} {url}");

        // prefer a cached RPT for this target
        if let TargetAuth::Rpt(rpt) = self.target_state(&key) {
            let response = self
                .send(method.clone(), url, headers.clone(), body.clone(), &rpt)
                .await?;
            if response.status() != reqwest::StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            // the RPT was rejected, fall back to the access token
            debug!(target = %key, "rpt rejected, dropping to access token");
            self.targets.insert(key.clone(), TargetAuth::AccessToken);
        }

        let token = self.access_token().await?;
        self.targets
            .entry(key.clone())
            .or_insert(TargetAuth::AccessToken);

        let response = self
            .send(method.clone(), url, headers.clone(), body.clone(), &token)
            .await?;

        if !self.config.enable_uma {
            return Ok(response);
        }

        let status = response.status();
        if status != reqwest::StatusCode::UNAUTHORIZED
            && status != reqwest::StatusCode::FORBIDDEN
        {
            return Ok(response);
        }

        let Some(ticket) = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_ticket)
        else {
            return Ok(response);
        };

        debug!(target = %key, "received uma challenge, exchanging ticket");
        let rpt = self.exchange_ticket(&token, &ticket).await?;
        self.targets.insert(key, TargetAuth::Rpt(rpt.clone()));

        self.send(method, url, headers, body, &rpt).await
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        mut headers: reqwest::header::HeaderMap,
        body: Vec<u8>,
        token: &str,
    ) -> Result<reqwest::Response> {
        headers.remove(reqwest::header::AUTHORIZATION);
        self.http
            .request(method, url)
            .headers(headers)
            .bearer_auth(token)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("forward failed: {e}")))
    }

    async fn exchange_ticket(&self, access_token: &str, ticket: &str) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct RptResponse {
            access_token: String,
        }

        let snapshot = self.discovery.snapshot();
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
            return Err(Error::RetrieveRpt);
        }
        let rpt: RptResponse = response.json().await.map_err(|_| Error::RetrieveRpt)?;
        Ok(rpt.access_token)
    }
}

// ── forwarding-mode server ─────────────────────────────────────────────

struct ForwardingState {
    client: ForwardingClient,
    upstream: String,
}

/// Run the forwarding proxy: listen locally, forward everything to the
/// upstream with a token injected
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    let upstream = config
        .upstream_url
        .clone()
        .ok_or_else(|| Error::Config("forwarding mode requires upstream-url".to_string()))?;
    let config = Arc::new(config);

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::Config(format!("http client: {e}")))?;

    let discovery = Arc::new(
        Discovery::bootstrap(
            http.clone(),
            &config.discovery_url,
            config.openid_provider_retry_count,
        )
        .await?,
    );

    let state = Arc::new(ForwardingState {
        client: ForwardingClient::new(http, Arc::clone(&config), discovery),
        upstream,
    });

    let app = Router::new()
        .fallback(forwarding_handler)
        .with_state(state);

    let listener = TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "forwarding proxy listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Config(e.to_string()))?;
    Ok(())
}

async fn forwarding_handler(
    State(state): State<Arc<ForwardingState>>,
    request: Request<Body>,
) -> Response {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), ToString::to_string);
    let url = format!("{}{path_and_query}", state.upstream.trim_end_matches('/'));
    let method = request.method().clone();

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        if name == &header::HOST {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let body = match axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024).await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            warn!(error = %err, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "invalid body").into_response();
        }
    };

    match state.client.forward(method, &url, headers, body).await {
        Ok(upstream_response) => {
            let status = upstream_response.status();
            let mut builder = Response::builder().status(status);
            for (name, value) in upstream_response.headers() {
                builder = builder.header(name, value);
            }
            let bytes = upstream_response.bytes().await.unwrap_or_default();
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(err) => {
            warn!(error = %err, url = %url, "forwarding failed");
            (err.status_code(), "forwarding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ticket_from_challenge() {
        assert_eq!(
            parse_ticket("UMA realm=\"test\", ticket=\"abc123\"").as_deref(),
            Some("abc123")
        );
    }
}
