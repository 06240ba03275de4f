//! Command-line interface definitions for `oidc-gateway`.
//!
//! Defines the top-level [`Cli`] struct parsed by `clap`. Every flag has an
//! environment-variable alias so the gateway can be configured entirely from
//! a container environment; a YAML config file (`--config`) supplies the same
//! keys and is overridden by explicit flags.

use std::path::PathBuf;

use clap::Parser;

/// Authenticating reverse proxy enforcing OpenID Connect and UMA 2.0
///
/// Sits in front of an HTTP upstream, terminates the Authorization Code flow
/// (with optional PKCE), validates bearer tokens, renews refresh tokens and
/// applies per-resource access policies before forwarding requests.
#[derive(Parser, Debug, Clone)]
#[command(name = "oidc-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the gateway configuration file (YAML)
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// OpenID Connect discovery URL of the identity provider realm
    #[arg(long, env = "GATEWAY_DISCOVERY_URL")]
    pub discovery_url: Option<String>,

    /// OAuth client id registered with the identity provider
    #[arg(long, env = "GATEWAY_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "GATEWAY_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// Public URL the identity provider redirects back to
    #[arg(long, env = "GATEWAY_REDIRECTION_URL")]
    pub redirection_url: Option<String>,

    /// Address the proxy listens on, e.g. 0.0.0.0:3000
    #[arg(long, env = "GATEWAY_LISTEN")]
    pub listen: Option<String>,

    /// Address of an optional admin listener serving health and metrics
    #[arg(long, env = "GATEWAY_LISTEN_ADMIN")]
    pub listen_admin: Option<String>,

    /// URL of the upstream the proxy forwards to
    #[arg(long, env = "GATEWAY_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// Answer 401 instead of redirecting unauthenticated requests to the IdP
    #[arg(long, env = "GATEWAY_NO_REDIRECTS")]
    pub no_redirects: Option<bool>,

    /// Forward-auth mode: no upstream, decision returned via headers
    #[arg(long, env = "GATEWAY_NO_PROXY")]
    pub no_proxy: Option<bool>,

    /// Enable PKCE (S256) on the authorization code flow
    #[arg(long, env = "GATEWAY_ENABLE_PKCE")]
    pub enable_pkce: Option<bool>,

    /// Enable UMA 2.0 authorization
    #[arg(long, env = "GATEWAY_ENABLE_UMA")]
    pub enable_uma: Option<bool>,

    /// Require a UMA scope named after the request method
    #[arg(long, env = "GATEWAY_ENABLE_UMA_METHOD_SCOPE")]
    pub enable_uma_method_scope: Option<bool>,

    /// Renew access tokens with refresh tokens transparently
    #[arg(long, env = "GATEWAY_ENABLE_REFRESH_TOKENS")]
    pub enable_refresh_tokens: Option<bool>,

    /// Encrypt access and refresh tokens stored in cookies
    #[arg(long, env = "GATEWAY_ENABLE_ENCRYPTED_TOKEN")]
    pub enable_encrypted_token: Option<bool>,

    /// Encrypt cookies even when token encryption is otherwise disabled
    #[arg(long, env = "GATEWAY_FORCE_ENCRYPTED_COOKIE")]
    pub force_encrypted_cookie: Option<bool>,

    /// 32-byte key used to seal cookies (AES-256-GCM)
    #[arg(long, env = "GATEWAY_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// Refresh-token store URL; scheme selects the backend
    /// (memory://, file:///path, redis://host:port)
    #[arg(long, env = "GATEWAY_STORE_URL")]
    pub store_url: Option<String>,

    /// Name of the access-token cookie
    #[arg(long, env = "GATEWAY_COOKIE_ACCESS_NAME")]
    pub cookie_access_name: Option<String>,

    /// Name of the refresh-token cookie
    #[arg(long, env = "GATEWAY_COOKIE_REFRESH_NAME")]
    pub cookie_refresh_name: Option<String>,

    /// Name of the PKCE verifier cookie
    #[arg(long, env = "GATEWAY_COOKIE_PKCE_NAME")]
    pub cookie_pkce_name: Option<String>,

    /// Name of the UMA RPT cookie
    #[arg(long, env = "GATEWAY_COOKIE_UMA_NAME")]
    pub cookie_uma_name: Option<String>,

    /// Set the Secure attribute on cookies
    #[arg(long, env = "GATEWAY_SECURE_COOKIE")]
    pub secure_cookie: Option<bool>,

    /// Skip the issuer check on access tokens
    #[arg(long, env = "GATEWAY_SKIP_ACCESS_TOKEN_ISSUER_CHECK")]
    pub skip_access_token_issuer_check: Option<bool>,

    /// Skip the audience (client-id) check on access tokens
    #[arg(long, env = "GATEWAY_SKIP_ACCESS_TOKEN_CLIENTID_CHECK")]
    pub skip_access_token_clientid_check: Option<bool>,

    /// Forward the verified token to the upstream as Authorization: Bearer
    #[arg(long, env = "GATEWAY_ENABLE_AUTHORIZATION_HEADER")]
    pub enable_authorization_header: Option<bool>,

    /// Run as an outbound forwarding proxy instead of a reverse proxy
    #[arg(long, env = "GATEWAY_ENABLE_FORWARDING")]
    pub enable_forwarding: Option<bool>,

    /// Grant used by the forwarding proxy: client_credentials or password
    #[arg(long, env = "GATEWAY_FORWARDING_GRANT_TYPE")]
    pub forwarding_grant_type: Option<String>,

    /// Username for the password grant in forwarding mode
    #[arg(long, env = "GATEWAY_FORWARDING_USERNAME")]
    pub forwarding_username: Option<String>,

    /// Password for the password grant in forwarding mode
    #[arg(long, env = "GATEWAY_FORWARDING_PASSWORD", hide_env_values = true)]
    pub forwarding_password: Option<String>,

    /// Protected resource rules, repeatable:
    /// uri=/path|methods=GET,POST|roles=a,b|require-any-role=true
    #[arg(long = "resources", env = "GATEWAY_RESOURCES", value_delimiter = ';')]
    pub resources: Vec<String>,

    /// Claims injected into upstream headers, repeatable: claim|Header-Name
    #[arg(long = "add-claims", value_delimiter = ',')]
    pub add_claims: Vec<String>,

    /// Global claim predicates, repeatable: claim=regex
    #[arg(long = "match-claims", value_delimiter = ',')]
    pub match_claims: Vec<String>,

    /// Extra headers set on every upstream request, repeatable: Name=value
    #[arg(long = "headers", value_delimiter = ',')]
    pub headers: Vec<String>,

    /// Base URI the proxy's own endpoints are mounted under
    #[arg(long, env = "GATEWAY_BASE_URI")]
    pub base_uri: Option<String>,

    /// Enable the Prometheus metrics endpoint
    #[arg(long, env = "GATEWAY_ENABLE_METRICS")]
    pub enable_metrics: Option<bool>,

    /// Deny requests that match no resource rule
    #[arg(long, env = "GATEWAY_ENABLE_DEFAULT_DENY")]
    pub enable_default_deny: Option<bool>,

    /// Timeout for calls to the identity provider, seconds
    #[arg(long, env = "GATEWAY_OPENID_PROVIDER_TIMEOUT")]
    pub openid_provider_timeout: Option<u64>,

    /// Discovery retry attempts before startup fails
    #[arg(long, env = "GATEWAY_OPENID_PROVIDER_RETRY_COUNT")]
    pub openid_provider_retry_count: Option<u32>,

    /// Allowed CORS origins
    #[arg(long = "cors-origins", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Allowed CORS methods
    #[arg(long = "cors-methods", value_delimiter = ',')]
    pub cors_methods: Vec<String>,

    /// Minimum log level: trace, debug, info, warn, or error
    #[arg(long, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format: "text" for human-readable, "json" for structured
    #[arg(long, env = "GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
