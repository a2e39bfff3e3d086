//! Per-connection read loop and control message handling.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, trace, warn};
use vigil_protocol::{codec, ClientMessage, CloseReason, ProtocolError, ServerMessage};
use vigil_transport::{FrameStream, InboundFrame};

use crate::manager::ConnectionManager;
use crate::metadata::ConnectionId;
use crate::metrics;
use crate::providers::ProviderContext;

/// Retires its connection when dropped, however the read loop ends.
struct RetireGuard {
    manager: Arc<ConnectionManager>,
    id: ConnectionId,
}

impl Drop for RetireGuard {
    fn drop(&mut self) {
        let reason = if self.manager.is_shutting_down() {
            CloseReason::GoingAway
        } else {
            CloseReason::Normal
        };
        self.manager.retire_with(self.id, reason);
    }
}

/// Read control messages from `stream` and answer them until the session ends.
///
/// The session ends when the peer disconnects, the transport fails, a reply
/// cannot be delivered, the connection is retired elsewhere, or the manager
/// shuts down. The connection is retired exactly once on the way out.
pub async fn run_session(
    manager: Arc<ConnectionManager>,
    id: ConnectionId,
    mut stream: Box<dyn FrameStream>,
) {
    let guard = RetireGuard {
        manager: Arc::clone(&manager),
        id,
    };
    let Some(handle) = manager.registry().handle_of(id) else {
        return;
    };
    let shutdown = manager.shutdown_signal();

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = handle.closed() => break,
            frame = stream.recv() => frame,
        };

        let reply = match frame {
            Ok(Some(frame)) => manager.handle_frame(id, frame),
            Ok(None) => {
                debug!(connection = %id, "Peer disconnected");
                break;
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "Transport error");
                break;
            }
        };

        if manager.send_to_one(id, &reply).await.is_err() {
            break;
        }
    }

    drop(guard);
}

impl ConnectionManager {
    /// Answer one inbound frame.
    ///
    /// Undecodable frames produce an `error` reply; they never end the session.
    pub fn handle_frame(&self, id: ConnectionId, frame: InboundFrame) -> ServerMessage {
        let decoded = match frame {
            InboundFrame::Text(text) => codec::decode(&text),
            InboundFrame::Binary(data) => Err(ProtocolError::BinaryFrame(data.len())),
        };

        match decoded {
            Ok(message) => self.handle_message(id, message),
            Err(e) => {
                debug!(connection = %id, error = %e, "Rejected inbound frame");
                metrics::record_protocol_error();
                ServerMessage::error(e.client_message())
            }
        }
    }

    /// Answer one decoded control message.
    pub fn handle_message(&self, id: ConnectionId, message: ClientMessage) -> ServerMessage {
        trace!(connection = %id, kind = %message.message_type(), "Control message");

        match message {
            ClientMessage::Ping { data } => ServerMessage::pong(data),
            ClientMessage::Subscribe { channels } => self.subscribe(id, channels),
            ClientMessage::Heartbeat {} => {
                self.registry().touch_heartbeat(id, Instant::now());
                ServerMessage::heartbeat_ack()
            }
            ClientMessage::RequestData { request_type } => {
                self.request_data(id, request_type.as_deref())
            }
        }
    }

    fn subscribe(&self, id: ConnectionId, topics: Vec<String>) -> ServerMessage {
        let Some(channel) = self.registry().channel_of(id) else {
            return ServerMessage::error("Connection not registered");
        };

        let invalid = channel.invalid_topics(&topics);
        if !invalid.is_empty() {
            debug!(connection = %id, ?invalid, "Rejected subscription");
            return ServerMessage::invalid_entries(
                format!("Invalid channels: {}", invalid.join(", ")),
                invalid,
            );
        }

        self.registry()
            .set_subscriptions(id, topics.iter().cloned().collect());
        debug!(connection = %id, channel = %channel, ?topics, "Subscriptions replaced");
        ServerMessage::subscription_confirmed(topics)
    }

    fn request_data(&self, id: ConnectionId, request_type: Option<&str>) -> ServerMessage {
        let Some(metadata) = self.registry().metadata_of(id) else {
            return ServerMessage::error("Connection not registered");
        };
        let Some(request_type) = request_type else {
            return ServerMessage::error("Unsupported request: null");
        };

        let ctx = ProviderContext {
            channel: metadata.channel,
            connection_id: id,
            identity: metadata.identity.as_ref(),
            registry: self.registry(),
        };

        match self.providers().lookup(request_type, &ctx) {
            Some(data) => ServerMessage::data_response(request_type, data),
            None => ServerMessage::error(format!("Unsupported request: {request_type}")),
        }
    }
}
