//! Home hub server
//!
//! Usage: `hub [CONFIG_DIR]`
//!
//! The config directory defaults to `$HUB_CONFIG_DIR`, then the current
//! directory. Log verbosity follows `RUST_LOG` (default `info`).

mod hub;

use anyhow::{Context, Result};
use hub::Hub;
use hub_config::HubConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn config_dir() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("HUB_CONFIG_DIR"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config_dir = config_dir();
    info!(config_dir = %config_dir.display(), "Starting home hub");

    let config = HubConfig::load(&config_dir)
        .with_context(|| format!("failed to load configuration from {}", config_dir.display()))?;
    let hub = Hub::build(&config_dir, config).await?;

    hub.reactor.start();
    info!(name = %hub.config.hub.name, "Home hub is running");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutting down...");
    };

    let served = hub_api::start_server(hub.app_state(), &hub.config.api.bind, shutdown).await;

    // The reactor finishes its current event before stopping
    hub.reactor.shutdown().await;
    served.context("API server failed")?;

    info!("Home hub stopped");
    Ok(())
}
