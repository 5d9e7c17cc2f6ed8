//! Platform Watch Controller
//!
//! Watches the cloud controller manager resources a cluster's platform
//! requires, and re-reconciles the owning `Infrastructure` object whenever
//! one of them changes.

mod config;
mod controller;
mod error;

use anyhow::Context;
use config::Config;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Platform Watch Controller");

    let config = Config::from_env().context("invalid controller configuration")?;

    info!("Configuration:");
    info!(
        "  Resync period: {}",
        config
            .resync
            .map_or_else(|| "default".to_string(), |d| format!("{}s", d.as_secs()))
    );
    info!(
        "  Event buffer: {}",
        config
            .event_buffer
            .map_or_else(|| "default".to_string(), |n| n.to_string())
    );

    let controller = Controller::new(config).await.context("failed to initialize controller")?;
    controller.run().await.context("controller failed")?;

    Ok(())
}
