//! Metrics export for the Vigil server.
//!
//! The hub records through the `metrics` facade; this module installs the
//! Prometheus recorder and its scrape endpoint.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Start the Prometheus metrics server and describe the hub's metrics.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or the port bound.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    vigil_core::metrics::describe();
    info!(%addr, "Metrics server listening");
    Ok(())
}
