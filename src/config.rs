//! Configuration management
//!
//! Configuration is merged from three layers: built-in defaults, an optional
//! YAML file, and `GATEWAY_`-prefixed environment variables. Explicit CLI
//! flags override all of them. Validation happens once at startup; a failed
//! validation is fatal.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::Cli;
use crate::{Error, Result};

/// Grant used by the forwarding proxy to obtain tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// client_credentials grant (service account)
    #[default]
    ClientCredentials,
    /// Resource-owner password grant
    Password,
}

/// Cookie names used for session state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieNames {
    /// Access-token cookie
    pub access: String,
    /// Refresh-token cookie
    pub refresh: String,
    /// State cookie written between authorize-redirect and callback
    pub request_state: String,
    /// PKCE code-verifier cookie
    pub pkce: String,
    /// UMA RPT cookie
    pub uma: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            access: "kc-access".to_string(),
            refresh: "kc-state".to_string(),
            request_state: "OAuth_Token_Request_State".to_string(),
            pkce: "pkce".to_string(),
            uma: "uma_token".to_string(),
        }
    }
}

/// CORS configuration applied by the middleware chain
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; empty disables the CORS layer
    pub origins: Vec<String>,
    /// Allowed methods
    pub methods: Vec<String>,
    /// Allowed request headers
    pub headers: Vec<String>,
    /// Allow credentials
    pub credentials: bool,
    /// Access-Control-Max-Age seconds
    pub max_age: u64,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OpenID Connect discovery URL of the identity provider realm
    pub discovery_url: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Public URL the IdP redirects back to; the callback path is appended
    pub redirection_url: String,
    /// Proxy listen address
    pub listen: String,
    /// Optional admin listener for health and metrics
    pub listen_admin: Option<String>,
    /// Upstream URL requests are forwarded to
    pub upstream_url: Option<String>,
    /// Base URI the proxy endpoints are mounted under
    pub base_uri: String,

    /// Answer 401 instead of redirecting to the IdP
    pub no_redirects: bool,
    /// Forward-auth mode (no upstream)
    pub no_proxy: bool,
    /// Enable PKCE on the code flow
    pub enable_pkce: bool,
    /// Enable UMA 2.0 authorization
    pub enable_uma: bool,
    /// Require a UMA scope named after the request method
    pub enable_uma_method_scope: bool,
    /// Renew access tokens using refresh tokens
    pub enable_refresh_tokens: bool,
    /// Seal tokens held in cookies
    pub enable_encrypted_token: bool,
    /// Seal cookies even when token encryption is off
    pub force_encrypted_cookie: bool,
    /// Deny requests matching no resource rule
    pub enable_default_deny: bool,
    /// Expose Prometheus metrics
    pub enable_metrics: bool,
    /// Forward the verified token upstream as Authorization: Bearer
    pub enable_authorization_header: bool,
    /// Forward the raw token upstream as X-Auth-Token
    pub enable_token_header: bool,
    /// Enable the /oauth/expired and /oauth/token diagnostic endpoints
    pub enable_session_diagnostics: bool,
    /// Accept the access token from a `token` query parameter
    pub enable_token_query_param: bool,
    /// Run as an outbound forwarding proxy
    pub enable_forwarding: bool,

    /// Grant used in forwarding mode
    pub forwarding_grant_type: GrantType,
    /// Username for the password grant
    pub forwarding_username: Option<String>,
    /// Password for the password grant
    pub forwarding_password: Option<String>,
    /// Seconds before expiry at which the forwarding client refreshes
    pub forwarding_token_margin: u64,

    /// 32-byte cookie sealing key
    pub encryption_key: String,
    /// Refresh-token store URL; scheme selects the backend
    pub store_url: Option<String>,

    /// Cookie names
    pub cookies: CookieNames,
    /// Set the Secure attribute on cookies
    pub secure_cookie: bool,
    /// SameSite attribute: "lax", "strict" or "none"
    pub same_site_cookie: String,
    /// Optional cookie domain
    pub cookie_domain: Option<String>,

    /// Skip the issuer check on access tokens
    pub skip_access_token_issuer_check: bool,
    /// Skip the audience check on access tokens
    pub skip_access_token_clientid_check: bool,
    /// Seconds before expiry at which a session refresh is attempted
    pub token_refresh_skew: u64,

    /// Protected resource rules in the resource DSL
    pub resources: Vec<String>,
    /// Claim-to-header injection mappings, `claim|Header-Name`
    pub add_claims: Vec<String>,
    /// Global claim predicates, claim name to regex
    pub match_claims: HashMap<String, String>,
    /// Extra headers set on every upstream request
    pub headers: HashMap<String, String>,
    /// Additional HTTP methods accepted in resource rules
    pub custom_http_methods: Vec<String>,

    /// CORS configuration
    pub cors: CorsConfig,

    /// Timeout for IdP calls, seconds
    pub openid_provider_timeout: u64,
    /// Discovery retry attempts before startup fails
    pub openid_provider_retry_count: u32,

    /// Optional URL to redirect to after logout
    pub post_logout_redirect_uri: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirection_url: String::new(),
            listen: "127.0.0.1:3000".to_string(),
            listen_admin: None,
            upstream_url: None,
            base_uri: String::new(),
            no_redirects: false,
            no_proxy: false,
            enable_pkce: false,
            enable_uma: false,
            enable_uma_method_scope: false,
            enable_refresh_tokens: false,
            enable_encrypted_token: false,
            force_encrypted_cookie: false,
            enable_default_deny: false,
            enable_metrics: false,
            enable_authorization_header: false,
            enable_token_header: false,
            enable_session_diagnostics: false,
            enable_token_query_param: false,
            enable_forwarding: false,
            forwarding_grant_type: GrantType::default(),
            forwarding_username: None,
            forwarding_password: None,
            forwarding_token_margin: 60,
            encryption_key: String::new(),
            store_url: None,
            cookies: CookieNames::default(),
            secure_cookie: true,
            same_site_cookie: "lax".to_string(),
            cookie_domain: None,
            skip_access_token_issuer_check: false,
            skip_access_token_clientid_check: false,
            token_refresh_skew: 0,
            resources: Vec::new(),
            add_claims: Vec::new(),
            match_claims: HashMap::new(),
            headers: HashMap::new(),
            custom_http_methods: Vec::new(),
            cors: CorsConfig::default(),
            openid_provider_timeout: 30,
            openid_provider_retry_count: 3,
            post_logout_redirect_uri: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("GATEWAY_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Overlay explicit CLI flags on top of file/env configuration
    pub fn merge_cli(&mut self, cli: &Cli) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = cli.$field.clone() {
                    self.$field = v;
                }
            };
        }
        take!(discovery_url);
        take!(client_id);
        take!(client_secret);
        take!(redirection_url);
        take!(listen);
        take!(base_uri);
        take!(no_redirects);
        take!(no_proxy);
        take!(enable_pkce);
        take!(enable_uma);
        take!(enable_uma_method_scope);
        take!(enable_refresh_tokens);
        take!(enable_encrypted_token);
        take!(force_encrypted_cookie);
        take!(enable_default_deny);
        take!(enable_metrics);
        take!(enable_authorization_header);
        take!(enable_forwarding);
        take!(secure_cookie);
        take!(skip_access_token_issuer_check);
        take!(skip_access_token_clientid_check);
        take!(encryption_key);
        take!(openid_provider_timeout);
        take!(openid_provider_retry_count);

        if let Some(v) = cli.listen_admin.clone() {
            self.listen_admin = Some(v);
        }
        if let Some(v) = cli.upstream_url.clone() {
            self.upstream_url = Some(v);
        }
        if let Some(v) = cli.store_url.clone() {
            self.store_url = Some(v);
        }
        if let Some(v) = cli.forwarding_username.clone() {
            self.forwarding_username = Some(v);
        }
        if let Some(v) = cli.forwarding_password.clone() {
            self.forwarding_password = Some(v);
        }
        if let Some(v) = cli.forwarding_grant_type.as_deref() {
            self.forwarding_grant_type = match v {
                "password" => GrantType::Password,
                _ => GrantType::ClientCredentials,
            };
        }
        if let Some(v) = cli.cookie_access_name.clone() {
            self.cookies.access = v;
        }
        if let Some(v) = cli.cookie_refresh_name.clone() {
            self.cookies.refresh = v;
        }
        if let Some(v) = cli.cookie_pkce_name.clone() {
            self.cookies.pkce = v;
        }
        if let Some(v) = cli.cookie_uma_name.clone() {
            self.cookies.uma = v;
        }
        if !cli.resources.is_empty() {
            self.resources = cli.resources.clone();
        }
        if !cli.add_claims.is_empty() {
            self.add_claims = cli.add_claims.clone();
        }
        for entry in &cli.match_claims {
            if let Some((claim, regex)) = entry.split_once('=') {
                self.match_claims
                    .insert(claim.to_string(), regex.to_string());
            }
        }
        for entry in &cli.headers {
            if let Some((name, value)) = entry.split_once('=') {
                self.headers.insert(name.to_string(), value.to_string());
            }
        }
        if !cli.cors_origins.is_empty() {
            self.cors.origins = cli.cors_origins.clone();
        }
        if !cli.cors_methods.is_empty() {
            self.cors.methods = cli.cors_methods.clone();
        }
    }

    /// Validate the configuration; errors here are fatal at startup
    pub fn validate(&self) -> Result<()> {
        if self.discovery_url.is_empty() {
            return Err(Error::Config("discovery-url is required".to_string()));
        }
        if Url::parse(&self.discovery_url).is_err() {
            return Err(Error::BadDiscoveryUriFormat(self.discovery_url.clone()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config("client-id is required".to_string()));
        }
        if self.enable_pkce && self.no_redirects {
            return Err(Error::PkceWithCodeFlowOnly);
        }
        if self.needs_encryption_key() && self.encryption_key.len() != 32 {
            return Err(Error::InvalidEncryptionKeyLength(self.encryption_key.len()));
        }
        if self.enable_forwarding
            && self.forwarding_grant_type == GrantType::Password
            && (self.forwarding_username.is_none() || self.forwarding_password.is_none())
        {
            return Err(Error::Config(
                "forwarding with the password grant requires forwarding-username and forwarding-password".to_string(),
            ));
        }
        if !self.no_proxy && !self.enable_forwarding && self.upstream_url.is_none() {
            return Err(Error::Config(
                "upstream-url is required unless no-proxy or forwarding mode is enabled".to_string(),
            ));
        }
        if let Some(ref url) = self.upstream_url {
            if Url::parse(url).is_err() {
                return Err(Error::Config(format!("invalid upstream-url: {url}")));
            }
        }
        Ok(())
    }

    /// Whether any feature requiring the sealing key is enabled
    #[must_use]
    pub fn needs_encryption_key(&self) -> bool {
        self.enable_encrypted_token || self.force_encrypted_cookie
    }

    /// Whether cookie values are sealed
    #[must_use]
    pub fn encrypts_cookies(&self) -> bool {
        self.enable_encrypted_token || self.force_encrypted_cookie
    }

    /// Timeout applied to every IdP call
    #[must_use]
    pub fn idp_timeout(&self) -> Duration {
        Duration::from_secs(self.openid_provider_timeout)
    }

    /// The callback redirect URI sent to the IdP
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!(
            "{}{}/oauth/callback",
            self.redirection_url.trim_end_matches('/'),
            self.base_uri
        )
    }

    /// Path prefix the proxy's own endpoints live under
    #[must_use]
    pub fn oauth_prefix(&self) -> String {
        format!("{}/oauth", self.base_uri)
    }
}
