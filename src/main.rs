//! oidc-gateway - authenticating reverse proxy for OpenID Connect and UMA 2.0

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use oidc_gateway::{cli::Cli, config::Config, forwarding, gateway::Gateway, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    config.merge_cli(&cli);

    let result = if config.enable_forwarding {
        forwarding::run(config).await
    } else {
        match Gateway::new(config).await {
            Ok(gateway) => gateway.run().await,
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}
