//! oidc-gateway library
//!
//! An authenticating reverse proxy that sits in front of an HTTP upstream and
//! enforces OpenID Connect authentication and, optionally, UMA 2.0
//! authorization before forwarding requests.
//!
//! # Features
//!
//! - **Authorization Code flow** with optional PKCE, state/nonce handling and
//!   transparent refresh-token renewal
//! - **Per-resource access policies**: roles, groups, claim predicates, HTTP
//!   methods, required headers
//! - **UMA 2.0**: permission-ticket acquisition and RPT exchange with
//!   per-session caching
//! - **Pluggable refresh-token store**: in-memory, file-backed, redis
//! - **Forward-auth mode**: allow/deny decision derived from `X-Forwarded-*`
//!   headers, no upstream of its own
//! - **Forwarding mode**: outbound client injecting service-account or user
//!   tokens into upstream requests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod cli;
pub mod config;
pub mod cookies;
pub mod discovery;
pub mod error;
pub mod forwarding;
pub mod gateway;
pub mod headers;
pub mod metrics;
pub mod oauth;
pub mod resource;
pub mod session;
pub mod store;
pub mod token;
pub mod uma;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
