//! Broadcast engine.
//!
//! Every fan-out works on a snapshot of the recipients, encodes the message
//! once and delivers to all recipients concurrently. A failed delivery
//! retires that recipient only; a broadcast as a whole never fails.

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, trace};
use vigil_protocol::{codec, ProtocolError, ServerMessage};
use vigil_transport::TransportError;

use crate::auth::Identity;
use crate::channel::ChannelKind;
use crate::handle::ConnectionHandle;
use crate::manager::ConnectionManager;
use crate::metadata::ConnectionId;
use crate::metrics;

/// Delivery errors.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The connection is not registered.
    #[error("Connection {0} is not connected")]
    NotConnected(ConnectionId),

    /// The transport rejected the frame; the connection has been retired.
    #[error("Delivery to {connection} failed: {source}")]
    Transport {
        connection: ConnectionId,
        #[source]
        source: TransportError,
    },

    /// The message could not be encoded.
    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub recipients: usize,
    /// Deliveries the transport accepted.
    pub delivered: usize,
    /// Failed deliveries; each of those connections was retired.
    pub failed: usize,
}

impl ConnectionManager {
    /// Deliver `message` to every member of `channel`.
    pub async fn broadcast_to_channel(
        &self,
        channel: ChannelKind,
        message: &ServerMessage,
    ) -> BroadcastReport {
        let members = self.registry().snapshot_members(channel);
        let (report, _) = self.fan_out(members, message).await;
        debug!(
            channel = %channel,
            kind = message.type_name(),
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast to channel"
        );
        report
    }

    /// Deliver `message` to every registered connection.
    pub async fn broadcast_all(&self, message: &ServerMessage) -> BroadcastReport {
        let (report, _) = self.broadcast_all_tracked(message).await;
        report
    }

    /// Deliver `message` to every connection of `identity`, on any channel.
    pub async fn send_to_identity(
        &self,
        identity: &Identity,
        message: &ServerMessage,
    ) -> BroadcastReport {
        let members = self.registry().members_by_identity(identity);
        let (report, _) = self.fan_out(members, message).await;
        debug!(
            identity = %identity,
            kind = message.type_name(),
            delivered = report.delivered,
            failed = report.failed,
            "Sent to identity"
        );
        report
    }

    /// Deliver `message` to one connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered or the transport
    /// failed. A transport failure retires the connection before returning.
    pub async fn send_to_one(
        &self,
        id: ConnectionId,
        message: &ServerMessage,
    ) -> Result<(), DeliveryError> {
        let handle = self
            .registry()
            .handle_of(id)
            .ok_or(DeliveryError::NotConnected(id))?;
        let text = codec::encode(message, Utc::now())?;

        match handle.send(text).await {
            Ok(()) => {
                trace!(connection = %id, kind = message.type_name(), "Delivered");
                metrics::record_delivery(message.type_name(), 1, 0);
                Ok(())
            }
            Err(source) => {
                debug!(connection = %id, error = %source, "Delivery failed, retiring");
                metrics::record_delivery(message.type_name(), 0, 1);
                self.retire(id);
                Err(DeliveryError::Transport {
                    connection: id,
                    source,
                })
            }
        }
    }

    /// Like [`ConnectionManager::broadcast_all`], also returning who received it.
    pub(crate) async fn broadcast_all_tracked(
        &self,
        message: &ServerMessage,
    ) -> (BroadcastReport, Vec<ConnectionId>) {
        let members = self.registry().all_connections();
        self.fan_out(members, message).await
    }

    async fn fan_out(
        &self,
        members: Vec<(ConnectionId, ConnectionHandle)>,
        message: &ServerMessage,
    ) -> (BroadcastReport, Vec<ConnectionId>) {
        let mut report = BroadcastReport {
            recipients: members.len(),
            ..BroadcastReport::default()
        };
        if members.is_empty() {
            return (report, Vec::new());
        }

        let text = match codec::encode(message, Utc::now()) {
            Ok(text) => text,
            Err(e) => {
                error!(kind = message.type_name(), error = %e, "Failed to encode broadcast");
                return (report, Vec::new());
            }
        };

        let deliveries = members.into_iter().map(|(id, handle)| {
            let text = text.clone();
            async move { (id, handle.send(text).await) }
        });

        let mut delivered_to = Vec::with_capacity(report.recipients);
        for (id, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    delivered_to.push(id);
                }
                Err(e) => {
                    report.failed += 1;
                    debug!(connection = %id, error = %e, "Delivery failed, retiring");
                    self.retire(id);
                }
            }
        }

        metrics::record_delivery(message.type_name(), report.delivered, report.failed);
        (report, delivered_to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RejectAll;
    use crate::manager::ManagerConfig;
    use crate::providers::DataProviders;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_transport::memory::{duplex, MemoryPeer, StalledSink};

    fn manager() -> ConnectionManager {
        ConnectionManager::new(
            ManagerConfig::default(),
            Arc::new(RejectAll),
            DataProviders::with_defaults(),
        )
    }

    /// Register a connection directly, skipping the welcome message.
    fn join(
        manager: &ConnectionManager,
        channel: ChannelKind,
        identity: Option<&str>,
    ) -> (ConnectionId, MemoryPeer) {
        let (sink, _stream, peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 8);
        let id = manager
            .registry()
            .register(handle, channel, identity.map(Identity::new))
            .unwrap();
        (id, peer)
    }

    async fn next_json(peer: &mut MemoryPeer) -> Value {
        serde_json::from_str(&peer.recv_text().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_channel_members_only() {
        let manager = manager();
        let (_, mut v1) = join(&manager, ChannelKind::Violations, None);
        let (_, mut v2) = join(&manager, ChannelKind::Violations, None);
        let (_, mut other) = join(&manager, ChannelKind::Analytics, None);

        let message = ServerMessage::NewViolation {
            data: json!({"id": 7}),
        };
        let report = manager
            .broadcast_to_channel(ChannelKind::Violations, &message)
            .await;
        assert_eq!(
            report,
            BroadcastReport {
                recipients: 2,
                delivered: 2,
                failed: 0
            }
        );

        for peer in [&mut v1, &mut v2] {
            let frame = next_json(peer).await;
            assert_eq!(frame["type"], "new_violation");
            assert_eq!(frame["data"]["id"], 7);
            assert!(frame["timestamp"].is_string());
        }
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_broken_member_is_retired_others_delivered() {
        const MEMBERS: usize = 5;

        for broken_at in [0, MEMBERS / 2, MEMBERS - 1] {
            let manager = manager();
            let mut peers: Vec<_> = (0..MEMBERS)
                .map(|_| join(&manager, ChannelKind::LiveFeed, None))
                .collect();
            let broken = peers[broken_at].0;
            peers[broken_at].1.break_transport();

            let report = manager
                .broadcast_to_channel(ChannelKind::LiveFeed, &ServerMessage::heartbeat(Utc::now()))
                .await;

            assert_eq!(report.delivered, MEMBERS - 1, "broken member at {broken_at}");
            assert_eq!(report.failed, 1, "broken member at {broken_at}");
            assert!(!manager.registry().contains(broken));
            assert_eq!(
                manager.registry().member_count(ChannelKind::LiveFeed),
                MEMBERS - 1
            );

            for (i, (_, peer)) in peers.iter_mut().enumerate() {
                if i != broken_at {
                    assert_eq!(next_json(peer).await["type"], "heartbeat");
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_member_times_out_and_is_retired() {
        let manager = manager();
        let (_, mut healthy) = join(&manager, ChannelKind::Violations, None);
        let stalled = manager
            .registry()
            .register(
                ConnectionHandle::spawn_with_timeout(
                    Box::new(StalledSink),
                    8,
                    Duration::from_secs(2),
                ),
                ChannelKind::Violations,
                None,
            )
            .unwrap();

        let message = ServerMessage::NewViolation {
            data: json!({"id": 1}),
        };
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            manager.broadcast_to_channel(ChannelKind::Violations, &message),
        )
        .await
        .unwrap();

        assert_eq!(
            report,
            BroadcastReport {
                recipients: 2,
                delivered: 1,
                failed: 1
            }
        );
        assert!(!manager.registry().contains(stalled));
        assert_eq!(next_json(&mut healthy).await["type"], "new_violation");

        // Later broadcasts no longer wait on it
        let started = tokio::time::Instant::now();
        let report = manager
            .broadcast_to_channel(ChannelKind::Violations, &message)
            .await;
        assert_eq!(report.delivered, 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_channel() {
        let manager = manager();
        let report = manager
            .broadcast_to_channel(ChannelKind::SystemStatus, &ServerMessage::heartbeat_ack())
            .await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_broadcast_all_spans_channels() {
        let manager = manager();
        let mut peers: Vec<_> = ChannelKind::ALL
            .into_iter()
            .map(|kind| join(&manager, kind, None).1)
            .collect();

        let report = manager
            .broadcast_all(&ServerMessage::heartbeat(Utc::now()))
            .await;
        assert_eq!(report.delivered, 4);

        for peer in &mut peers {
            assert_eq!(next_json(peer).await["type"], "heartbeat");
        }
    }

    #[tokio::test]
    async fn test_send_to_identity() {
        let manager = manager();
        let (_, mut a1) = join(&manager, ChannelKind::Violations, Some("alice"));
        let (_, mut a2) = join(&manager, ChannelKind::SystemStatus, Some("alice"));
        let (_, mut bob) = join(&manager, ChannelKind::Violations, Some("bob"));

        let alert = ServerMessage::SystemAlert {
            data: json!({"level": "warning"}),
        };
        let report = manager
            .send_to_identity(&Identity::new("alice"), &alert)
            .await;
        assert_eq!(report.delivered, 2);

        assert_eq!(next_json(&mut a1).await["type"], "system_alert");
        assert_eq!(next_json(&mut a2).await["type"], "system_alert");
        assert!(bob.try_recv().is_none());

        let nobody = manager
            .send_to_identity(&Identity::new("carol"), &alert)
            .await;
        assert_eq!(nobody.recipients, 0);
    }

    #[tokio::test]
    async fn test_send_to_one() {
        let manager = manager();
        let (id, mut peer) = join(&manager, ChannelKind::Analytics, None);

        manager
            .send_to_one(id, &ServerMessage::pong(json!("x")))
            .await
            .unwrap();
        let frame = next_json(&mut peer).await;
        assert_eq!(frame["type"], "pong");
        assert_eq!(frame["data"], "x");

        let missing = ConnectionId::generate();
        assert!(matches!(
            manager.send_to_one(missing, &ServerMessage::heartbeat_ack()).await,
            Err(DeliveryError::NotConnected(m)) if m == missing
        ));
    }

    #[tokio::test]
    async fn test_send_to_one_failure_retires() {
        let manager = manager();
        let (id, mut peer) = join(&manager, ChannelKind::Analytics, None);
        peer.break_transport();

        assert!(matches!(
            manager.send_to_one(id, &ServerMessage::heartbeat_ack()).await,
            Err(DeliveryError::Transport { .. })
        ));
        assert!(!manager.registry().contains(id));
    }

    #[tokio::test]
    async fn test_concurrent_broadcasts_keep_frames_whole() {
        let manager = Arc::new(manager());
        let (_, mut peer) = join(&manager, ChannelKind::Violations, None);

        let sends = (0..10).map(|i| {
            let manager = Arc::clone(&manager);
            async move {
                manager
                    .broadcast_to_channel(
                        ChannelKind::Violations,
                        &ServerMessage::NewViolation { data: json!(i) },
                    )
                    .await
            }
        });
        join_all(sends).await;

        let mut seen: Vec<i64> = Vec::new();
        for _ in 0..10 {
            seen.push(next_json(&mut peer).await["data"].as_i64().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
