//! # Vigil Server
//!
//! Realtime notification hub for traffic-violation monitoring.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! vigil
//!
//! # Run with a specific config file
//! vigil --config /path/to/vigil.toml
//!
//! # Run with environment variables
//! VIGIL_PORT=8080 VIGIL_JWT_SECRET=secret VIGIL__HUB__CAPACITY_PER_CHANNEL=500 vigil
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Realtime notification hub")]
struct Cli {
    /// Load configuration from this file instead of the default search paths.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=debug,vigil_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match &cli.config {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!(host = %config.host, port = config.port, "Starting Vigil server");

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!(error = %e, "Failed to start metrics server");
        }
    }

    handlers::run_server(config)
        .await
        .context("Vigil server failed")
}
