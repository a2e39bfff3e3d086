//! Connection lifecycle: admission, retirement and shutdown.
//!
//! A [`ConnectionManager`] ties the registry, the identity verifier and the
//! data providers together and owns the liveness supervisor tasks. It is
//! shared as an `Arc` by every consumer; there is no global instance.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_protocol::{CloseReason, ServerMessage};
use vigil_transport::FrameSink;

use crate::auth::{AuthError, Identity, IdentityVerifier};
use crate::broadcast::DeliveryError;
use crate::channel::ChannelKind;
use crate::handle::{ConnectionHandle, DEFAULT_OUTBOUND_QUEUE, DEFAULT_SEND_TIMEOUT};
use crate::metadata::ConnectionId;
use crate::metrics;
use crate::providers::DataProviders;
use crate::registry::{Registry, RegistryError, RegistryStats, DEFAULT_CHANNEL_CAPACITY};
use crate::supervisor;

/// What refreshes a connection's liveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// Only client `heartbeat` messages count.
    #[default]
    ClientHeartbeat,
    /// A successfully delivered server heartbeat counts as well.
    DeliveryRefreshes,
}

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum members per channel.
    pub capacity_per_channel: usize,
    /// Outbound queue depth per connection.
    pub outbound_queue: usize,
    /// Deadline for one frame to reach a connection's transport. A recipient
    /// that misses it is retired.
    pub send_timeout: Duration,
    /// Period of the server heartbeat broadcast.
    pub heartbeat_interval: Duration,
    /// Period of the stale-connection sweep.
    pub sweep_interval: Duration,
    /// Idle time after which a connection is stale.
    pub stale_timeout: Duration,
    /// What refreshes liveness.
    pub liveness: LivenessPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            capacity_per_channel: DEFAULT_CHANNEL_CAPACITY,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            stale_timeout: Duration::from_secs(300),
            liveness: LivenessPolicy::ClientHeartbeat,
        }
    }
}

/// Why an admission attempt failed.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Token verification failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(#[from] AuthError),

    /// Unknown channel or channel at capacity.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The manager is shutting down.
    #[error("Server shutting down")]
    ShuttingDown,

    /// The welcome message could not be delivered.
    #[error("Welcome delivery failed: {0}")]
    Delivery(#[source] DeliveryError),
}

impl AdmissionError {
    /// The close reason sent to the rejected transport.
    #[must_use]
    pub fn close_reason(&self) -> CloseReason {
        match self {
            AdmissionError::AuthFailed(_) => CloseReason::AuthenticationFailed,
            AdmissionError::Registry(RegistryError::UnknownChannel(_)) => {
                CloseReason::InvalidChannel
            }
            AdmissionError::Registry(RegistryError::CapacityExceeded { .. }) => {
                CloseReason::LimitExceeded
            }
            AdmissionError::ShuttingDown => CloseReason::GoingAway,
            AdmissionError::Delivery(_) => CloseReason::Normal,
        }
    }
}

/// A successfully admitted connection.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub connection_id: ConnectionId,
    pub channel: ChannelKind,
    pub identity: Option<Identity>,
}

/// The connection hub.
pub struct ConnectionManager {
    registry: Registry,
    verifier: Arc<dyn IdentityVerifier>,
    providers: DataProviders,
    config: ManagerConfig,
    shutdown: CancellationToken,
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

impl ConnectionManager {
    /// Create a manager without background tasks.
    ///
    /// Heartbeats and eviction only happen when driven explicitly through
    /// [`ConnectionManager::send_heartbeats`] and
    /// [`ConnectionManager::evict_stale`]. Use [`ConnectionManager::start`]
    /// to run them periodically.
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        verifier: Arc<dyn IdentityVerifier>,
        providers: DataProviders,
    ) -> Self {
        info!(?config, "Creating connection manager");
        Self {
            registry: Registry::with_capacity(config.capacity_per_channel),
            verifier,
            providers,
            config,
            shutdown: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Create a manager and start the liveness supervisor.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        config: ManagerConfig,
        verifier: Arc<dyn IdentityVerifier>,
        providers: DataProviders,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let mut manager = Self::new(config, verifier, providers);
            let tasks = manager.tasks.get_mut();
            tasks.spawn(supervisor::heartbeat_loop(
                weak.clone(),
                manager.config.heartbeat_interval,
                manager.shutdown.clone(),
            ));
            tasks.spawn(supervisor::eviction_loop(
                weak.clone(),
                manager.config.sweep_interval,
                manager.shutdown.clone(),
            ));
            if manager.config.send_timeout >= manager.config.heartbeat_interval {
                warn!(
                    send_timeout = ?manager.config.send_timeout,
                    heartbeat = ?manager.config.heartbeat_interval,
                    "Send timeout is not below the heartbeat interval; a stalled client can delay heartbeats"
                );
            }
            info!(
                heartbeat = ?manager.config.heartbeat_interval,
                sweep = ?manager.config.sweep_interval,
                stale_after = ?manager.config.stale_timeout,
                "Liveness supervisor started"
            );
            manager
        })
    }

    /// Admit a new transport session on `channel_name`.
    ///
    /// On failure the transport has been closed with the code matching
    /// [`AdmissionError::close_reason`] and nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected, the channel is unknown or
    /// full, the manager is shutting down, or the welcome message could not
    /// be delivered.
    pub async fn admit(
        &self,
        mut sink: Box<dyn FrameSink>,
        channel_name: &str,
        token: Option<&str>,
    ) -> Result<Admitted, AdmissionError> {
        let remote = sink.remote_addr();

        match self.authorize(channel_name, token).await {
            Ok((channel, identity)) => {
                let handle = ConnectionHandle::spawn_with_timeout(
                    sink,
                    self.config.outbound_queue,
                    self.config.send_timeout,
                );
                self.enroll(handle, channel, identity).await
            }
            Err(e) => {
                let reason = e.close_reason();
                warn!(
                    channel = %channel_name,
                    remote = remote.as_deref().unwrap_or("unknown"),
                    code = reason.code(),
                    error = %e,
                    "Admission rejected"
                );
                metrics::record_rejection(reason.reason());
                if let Err(close_err) = sink.close(reason.into()).await {
                    debug!(error = %close_err, "Close after rejection failed");
                }
                Err(e)
            }
        }
    }

    async fn authorize(
        &self,
        channel_name: &str,
        token: Option<&str>,
    ) -> Result<(ChannelKind, Option<Identity>), AdmissionError> {
        if self.is_shutting_down() {
            return Err(AdmissionError::ShuttingDown);
        }

        let identity = match token.filter(|t| !t.is_empty()) {
            Some(token) => Some(self.verifier.verify(token).await?),
            None => None,
        };

        let channel = channel_name.parse::<ChannelKind>()?;
        Ok((channel, identity))
    }

    async fn enroll(
        &self,
        handle: ConnectionHandle,
        channel: ChannelKind,
        identity: Option<Identity>,
    ) -> Result<Admitted, AdmissionError> {
        let id = match self.registry.register(handle.clone(), channel, identity.clone()) {
            Ok(id) => id,
            Err(e) => {
                let err = AdmissionError::from(e);
                let reason = err.close_reason();
                warn!(channel = %channel, code = reason.code(), error = %err, "Admission rejected");
                metrics::record_rejection(reason.reason());
                handle.close(reason);
                return Err(err);
            }
        };
        metrics::record_admission(channel);

        // Shutdown may have swept the registry between the first check and
        // registration.
        if self.is_shutting_down() {
            self.retire_with(id, CloseReason::GoingAway);
            return Err(AdmissionError::ShuttingDown);
        }

        let welcome = ServerMessage::connected(id.to_string(), chrono::Utc::now());
        self.send_to_one(id, &welcome)
            .await
            .map_err(AdmissionError::Delivery)?;

        info!(
            connection = %id,
            channel = %channel,
            identity = identity.as_ref().map(Identity::subject).unwrap_or("anonymous"),
            "Connection admitted"
        );

        Ok(Admitted {
            connection_id: id,
            channel,
            identity,
        })
    }

    /// Retire a connection with a normal close.
    ///
    /// Returns whether this call removed it. Safe to call any number of times.
    pub fn retire(&self, id: ConnectionId) -> bool {
        self.retire_with(id, CloseReason::Normal)
    }

    /// Retire a connection, closing its transport with `reason`.
    pub fn retire_with(&self, id: ConnectionId, reason: CloseReason) -> bool {
        let Some(entry) = self.registry.unregister(id) else {
            return false;
        };

        entry.handle.close(reason);
        metrics::record_retirement(entry.metadata.channel);
        info!(
            connection = %id,
            channel = %entry.metadata.channel,
            code = reason.code(),
            "Connection retired"
        );
        true
    }

    /// Stop the supervisor and retire every connection.
    ///
    /// Returns once both supervisor loops have exited and the registry is
    /// empty. Later admissions are refused.
    pub async fn shutdown(&self) {
        info!("Shutting down connection manager");
        self.shutdown.cancel();

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Supervisor task panicked");
                }
            }
        }
        drop(tasks);

        let connections = self.registry.all_connections();
        let count = connections.len();
        for (id, _) in connections {
            self.retire_with(id, CloseReason::GoingAway);
        }
        info!(retired = count, "Connection manager stopped");
    }

    /// Whether [`ConnectionManager::shutdown`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when shutdown starts.
    #[must_use]
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// The connection registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The data providers.
    #[must_use]
    pub fn providers(&self) -> &DataProviders {
        &self.providers
    }

    /// The manager configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("connections", &self.registry.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
