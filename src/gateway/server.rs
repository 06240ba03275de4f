//! Gateway server
//!
//! Wires the components together from configuration, binds the main (and
//! optional admin) listener and runs until SIGINT/SIGTERM.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{create_admin_router, create_router};
use super::AppState;
use crate::authz::AuthzEngine;
use crate::config::Config;
use crate::discovery::Discovery;
use crate::headers::HeaderInjector;
use crate::resource::{Resource, ResourceSet};
use crate::session::SessionManager;
use crate::store::Store;
use crate::token::CookieCipher;
use crate::uma::UmaClient;
use crate::{Error, Result, metrics};

/// The authenticating reverse proxy
pub struct Gateway {
    state: Arc<AppState>,
}

impl Gateway {
    /// Validate configuration, run discovery and assemble the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error, or [`Error::Idp`] when
    /// discovery stays unreachable after the configured retries. Both are
    /// fatal at startup.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
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

        let cipher = if config.encrypts_cookies() {
            Some(Arc::new(CookieCipher::new(&config.encryption_key)?))
        } else {
            None
        };

        let store = match config.store_url {
            Some(ref url) => {
                let store = Store::from_url(url).await?;
                info!(url = %url, "refresh-token store attached");
                Some(Arc::new(store))
            }
            None => None,
        };

        let mut resources = Vec::with_capacity(config.resources.len());
        for dsl in &config.resources {
            resources.push(Resource::parse(dsl)?);
        }
        let resources = Arc::new(ResourceSet::new(
            resources,
            config.enable_default_deny,
            &config.custom_http_methods,
            &config.match_claims,
        )?);

        for resource in resources.resources() {
            info!(resource = %resource, "protecting resource");
        }

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&config),
            cipher,
            store,
            http.clone(),
        ));

        let per_resource_uma = resources.resources().iter().any(|r| r.uma_enabled);
        let uma = if config.enable_uma || per_resource_uma {
            Some(Arc::new(UmaClient::new(http.clone(), Arc::clone(&config))))
        } else {
            None
        };

        let metrics_handle = if config.enable_metrics {
            Some(metrics::install_recorder()?)
        } else {
            None
        };

        let state = Arc::new(AppState {
            injector: Arc::new(HeaderInjector::new(Arc::clone(&config))),
            authz: Arc::new(AuthzEngine::new()),
            config,
            discovery,
            sessions,
            resources,
            uma,
            http,
            metrics: metrics_handle,
        });

        Ok(Self { state })
    }

    /// Router for the main listener, exposed for in-process testing
    #[must_use]
    pub fn router(&self) -> axum::Router {
        create_router(Arc::clone(&self.state))
    }

    /// Run the listeners until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let config = Arc::clone(&self.state.config);

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        if let Some(ref admin_addr) = config.listen_admin {
            let admin_router = create_admin_router(Arc::clone(&self.state));
            let listener = TcpListener::bind(admin_addr).await?;
            info!(listen = %admin_addr, "admin listener up");
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let result = axum::serve(listener, admin_router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    })
                    .await;
                if let Err(err) = result {
                    warn!(error = %err, "admin listener failed");
                }
            });
        }

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(&config.listen).await?;

        info!(listen = %config.listen, "gateway listening");
        match config.upstream_url {
            Some(ref upstream) if !config.no_proxy => info!(upstream = %upstream, "proxying to upstream"),
            _ => info!("forward-auth mode, no upstream"),
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Config(e.to_string()))?;

        info!("gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
}
