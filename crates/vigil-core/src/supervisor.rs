//! Liveness supervisor.
//!
//! Two periodic loops run for the lifetime of a started manager: one
//! broadcasts server heartbeats, the other evicts connections whose last
//! client heartbeat is older than the staleness threshold. A panic inside one
//! iteration is caught and logged and the loop carries on at its next tick.

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vigil_protocol::{CloseReason, ServerMessage};

use crate::broadcast::BroadcastReport;
use crate::manager::{ConnectionManager, LivenessPolicy};
use crate::metadata::ConnectionId;
use crate::metrics;

impl ConnectionManager {
    /// Broadcast one server heartbeat to every connection.
    ///
    /// Under [`LivenessPolicy::DeliveryRefreshes`] each successful delivery
    /// also refreshes that connection's liveness.
    pub async fn send_heartbeats(&self) -> BroadcastReport {
        let message = ServerMessage::heartbeat(chrono::Utc::now());
        let (report, delivered_to) = self.broadcast_all_tracked(&message).await;

        if self.config().liveness == LivenessPolicy::DeliveryRefreshes {
            let now = Instant::now();
            for id in delivered_to {
                self.registry().touch_heartbeat(id, now);
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed,
            "Heartbeat sent"
        );
        report
    }

    /// Retire every connection idle for longer than the staleness threshold.
    ///
    /// Returns the evicted connections.
    pub fn evict_stale(&self) -> Vec<ConnectionId> {
        let stale = self
            .registry()
            .stale_connections(Instant::now(), self.config().stale_timeout);

        let evicted: Vec<ConnectionId> = stale
            .into_iter()
            .filter(|id| self.retire_with(*id, CloseReason::Stale))
            .collect();

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted stale connections");
            metrics::record_evictions(evicted.len());
        }
        evicted
    }
}

pub(crate) async fn heartbeat_loop(
    manager: Weak<ConnectionManager>,
    period: Duration,
    shutdown: CancellationToken,
) {
    run_periodic("heartbeat", manager, period, shutdown, |manager| async move {
        manager.send_heartbeats().await;
    })
    .await;
}

pub(crate) async fn eviction_loop(
    manager: Weak<ConnectionManager>,
    period: Duration,
    shutdown: CancellationToken,
) {
    run_periodic("eviction", manager, period, shutdown, |manager| async move {
        manager.evict_stale();
    })
    .await;
}

/// Run `iteration` every `period` until `shutdown` fires or the manager is
/// dropped. The first iteration runs one period after start. An iteration
/// still running when `shutdown` fires is abandoned.
async fn run_periodic<F, Fut>(
    name: &'static str,
    manager: Weak<ConnectionManager>,
    period: Duration,
    shutdown: CancellationToken,
    mut iteration: F,
) where
    F: FnMut(Arc<ConnectionManager>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };

        let outcome = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            outcome = AssertUnwindSafe(iteration(manager)).catch_unwind() => outcome,
        };

        if let Err(panic) = outcome {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(task = name, panic = %message, "Supervisor iteration panicked");
            metrics::record_supervisor_panic(name);
        }
    }

    debug!(task = name, "Supervisor loop stopped");
}
