//! Per-connection metadata.
//!
//! Liveness is measured with [`tokio::time::Instant`] so the supervisor can be
//! tested with a paused clock; the wall-clock admission time is kept for
//! reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::auth::Identity;
use crate::channel::ChannelKind;

/// Unique identifier for an admitted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Metadata for a single admitted connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Connection ID.
    pub connection_id: ConnectionId,
    /// The channel the connection was admitted to.
    pub channel: ChannelKind,
    /// Authenticated identity, absent for anonymous sessions.
    pub identity: Option<Identity>,
    /// When the connection was admitted (monotonic).
    pub connected_at: Instant,
    /// Wall-clock admission time.
    pub connected_at_utc: DateTime<Utc>,
    /// Last client heartbeat, or admission time if none yet.
    pub last_heartbeat: Instant,
    /// Subscribed topics.
    pub subscriptions: BTreeSet<String>,
}

impl ConnectionMetadata {
    /// Create metadata for a connection admitted now.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        channel: ChannelKind,
        identity: Option<Identity>,
    ) -> Self {
        let now = Instant::now();
        Self {
            connection_id,
            channel,
            identity,
            connected_at: now,
            connected_at_utc: Utc::now(),
            last_heartbeat: now,
            subscriptions: BTreeSet::new(),
        }
    }

    /// Record a heartbeat at `now`.
    ///
    /// Never moves `last_heartbeat` before `connected_at` or backwards.
    pub fn touch(&mut self, now: Instant) {
        self.last_heartbeat = self.last_heartbeat.max(now);
    }

    /// Time since the last heartbeat.
    #[must_use]
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat)
    }

    /// Check if this connection is stale (no heartbeat for longer than `timeout`).
    #[must_use]
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.idle(now) > timeout
    }

    /// Replace the subscribed topics.
    pub fn set_subscriptions(&mut self, topics: impl IntoIterator<Item = String>) {
        self.subscriptions = topics.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ConnectionMetadata {
        ConnectionMetadata::new(ConnectionId::generate(), ChannelKind::Violations, None)
    }

    #[test]
    fn test_unique_connection_ids() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[test]
    fn test_new_metadata_starts_fresh() {
        let meta = metadata();
        assert_eq!(meta.last_heartbeat, meta.connected_at);
        assert!(meta.subscriptions.is_empty());
        assert!(meta.identity.is_none());
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut meta = metadata();
        let later = meta.connected_at + Duration::from_secs(10);
        meta.touch(later);
        assert_eq!(meta.last_heartbeat, later);

        meta.touch(meta.connected_at);
        assert_eq!(meta.last_heartbeat, later);
        assert!(meta.last_heartbeat >= meta.connected_at);
    }

    #[test]
    fn test_staleness_threshold_is_exclusive() {
        let meta = metadata();
        let timeout = Duration::from_secs(300);

        assert!(!meta.is_stale(meta.connected_at + timeout, timeout));
        assert!(meta.is_stale(meta.connected_at + timeout + Duration::from_millis(1), timeout));
    }

    #[test]
    fn test_set_subscriptions_replaces() {
        let mut meta = metadata();
        meta.set_subscriptions(["new_violations".to_string(), "violation_alerts".to_string()]);
        meta.set_subscriptions(["violation_updates".to_string()]);
        assert_eq!(
            meta.subscriptions.iter().collect::<Vec<_>>(),
            vec!["violation_updates"]
        );
    }
}
