//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`vigil.toml`, `/etc/vigil/vigil.toml`,
//!   `~/.config/vigil/vigil.toml`)
//! - Environment variables (`VIGIL__HUB__CAPACITY_PER_CHANNEL=50`, ...)
//! - `VIGIL_HOST`, `VIGIL_PORT` and `VIGIL_JWT_SECRET` as defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_core::{LivenessPolicy, ManagerConfig};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Connection hub configuration.
    #[serde(default)]
    pub hub: HubConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix for WebSocket endpoints; the channel is appended.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Connection hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Maximum connections per channel.
    #[serde(default = "default_capacity")]
    pub capacity_per_channel: usize,

    /// Outbound queue depth per connection.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Deadline for one outbound frame, in milliseconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Server heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Stale-connection sweep interval in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Idle time before a connection is evicted, in milliseconds.
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_ms: u64,

    /// What refreshes liveness.
    #[serde(default)]
    pub liveness: LivenessPolicy,
}

/// Token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for JWTs. Without it every supplied token is rejected.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: Option<String>,

    /// JWT algorithm.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("VIGIL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("VIGIL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_capacity() -> usize {
    100
}

fn default_outbound_queue() -> usize {
    64
}

fn default_send_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_sweep_interval() -> u64 {
    60_000 // 60 seconds
}

fn default_stale_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_jwt_secret() -> Option<String> {
    std::env::var("VIGIL_JWT_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            hub: HubConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity_per_channel: default_capacity(),
            outbound_queue: default_outbound_queue(),
            send_timeout_ms: default_send_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            sweep_interval_ms: default_sweep_interval(),
            stale_timeout_ms: default_stale_timeout(),
            liveness: LivenessPolicy::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            algorithm: default_algorithm(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl HubConfig {
    /// Convert to the manager's configuration.
    #[must_use]
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            capacity_per_channel: self.capacity_per_channel,
            outbound_queue: self.outbound_queue,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            stale_timeout: Duration::from_millis(self.stale_timeout_ms),
            liveness: self.liveness,
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, layered with
    /// `VIGIL__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// an environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "vigil.toml",
            "/etc/vigil/vigil.toml",
            "~/.config/vigil/vigil.toml",
        ];

        let file = config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        let mut builder = ::config::Config::builder();
        if let Some(path) = &file {
            tracing::info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path.as_path()));
        }

        let layered = builder
            .add_source(
                ::config::Environment::with_prefix("VIGIL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        layered
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
