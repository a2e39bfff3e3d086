//! Message types for the Vigil protocol.
//!
//! Client and server messages are internally tagged JSON objects. The tag
//! lives in the `type` field and uses snake_case names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientMessageType {
    Ping,
    Subscribe,
    Heartbeat,
    RequestData,
}

impl ClientMessageType {
    /// All client message types.
    pub const ALL: [ClientMessageType; 4] = [
        ClientMessageType::Ping,
        ClientMessageType::Subscribe,
        ClientMessageType::Heartbeat,
        ClientMessageType::RequestData,
    ];

    /// The wire name of this message type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ClientMessageType::Ping => "ping",
            ClientMessageType::Subscribe => "subscribe",
            ClientMessageType::Heartbeat => "heartbeat",
            ClientMessageType::RequestData => "request_data",
        }
    }

    /// Look up a message type by its wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ClientMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control message sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Echo request.
    Ping {
        /// Arbitrary payload echoed back in the pong.
        #[serde(default)]
        data: Value,
    },

    /// Replace the topic subscriptions of this connection.
    Subscribe {
        /// Requested topics. Missing means an empty list.
        #[serde(default)]
        channels: Vec<String>,
    },

    /// Client-originated liveness signal.
    Heartbeat {},

    /// Request a data snapshot from the channel's providers.
    RequestData {
        /// Provider name, e.g. `current_status`.
        #[serde(default, alias = "requestType")]
        request_type: Option<String>,
    },
}

impl ClientMessage {
    /// Get the message type.
    #[must_use]
    pub fn message_type(&self) -> ClientMessageType {
        match self {
            ClientMessage::Ping { .. } => ClientMessageType::Ping,
            ClientMessage::Subscribe { .. } => ClientMessageType::Subscribe,
            ClientMessage::Heartbeat {} => ClientMessageType::Heartbeat,
            ClientMessage::RequestData { .. } => ClientMessageType::RequestData,
        }
    }
}

/// A message sent by the server.
///
/// The `timestamp` field is not part of the variants; it is added by
/// [`crate::codec::encode`] at send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Welcome message sent after a successful admission.
    Connection {
        /// Always `connected`.
        status: String,
        /// Identifier assigned to the connection.
        connection_id: String,
        /// Server wall-clock time at admission.
        server_time: DateTime<Utc>,
    },

    /// Answer to a ping.
    Pong {
        /// Payload echoed from the ping.
        data: Value,
    },

    /// Server-pushed keepalive.
    Heartbeat {
        /// Server wall-clock time.
        server_time: DateTime<Utc>,
    },

    /// Acknowledgement of a client heartbeat.
    HeartbeatAck {},

    /// Subscription update accepted.
    SubscriptionConfirmed {
        /// The topics now subscribed.
        channels: Vec<String>,
    },

    /// Answer to a data request.
    DataResponse {
        /// The provider that produced the data.
        request_type: String,
        /// Provider output.
        data: Value,
    },

    /// In-band error. The connection stays open.
    Error {
        /// Human-readable error message.
        message: String,
        /// Offending entries, when the error concerns a list.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invalid: Option<Vec<String>>,
    },

    /// A new violation was recorded.
    NewViolation { data: Value },

    /// A camera changed status.
    CameraStatusUpdate { data: Value },

    /// Operational alert.
    SystemAlert { data: Value },

    /// Fresh analytics figures.
    AnalyticsUpdate { data: Value },
}

impl ServerMessage {
    /// Create a welcome message.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, server_time: DateTime<Utc>) -> Self {
        ServerMessage::Connection {
            status: "connected".to_string(),
            connection_id: connection_id.into(),
            server_time,
        }
    }

    /// Create a pong echoing `data`.
    #[must_use]
    pub fn pong(data: Value) -> Self {
        ServerMessage::Pong { data }
    }

    /// Create a server heartbeat.
    #[must_use]
    pub fn heartbeat(server_time: DateTime<Utc>) -> Self {
        ServerMessage::Heartbeat { server_time }
    }

    /// Create a heartbeat acknowledgement.
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        ServerMessage::HeartbeatAck {}
    }

    /// Create a subscription confirmation.
    #[must_use]
    pub fn subscription_confirmed(channels: Vec<String>) -> Self {
        ServerMessage::SubscriptionConfirmed { channels }
    }

    /// Create a data response.
    #[must_use]
    pub fn data_response(request_type: impl Into<String>, data: Value) -> Self {
        ServerMessage::DataResponse {
            request_type: request_type.into(),
            data,
        }
    }

    /// Create an error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            invalid: None,
        }
    }

    /// Create an error message listing offending entries.
    #[must_use]
    pub fn invalid_entries(message: impl Into<String>, invalid: Vec<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            invalid: Some(invalid),
        }
    }

    /// The wire name of this message.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Connection { .. } => "connection",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Heartbeat { .. } => "heartbeat",
            ServerMessage::HeartbeatAck {} => "heartbeat_ack",
            ServerMessage::SubscriptionConfirmed { .. } => "subscription_confirmed",
            ServerMessage::DataResponse { .. } => "data_response",
            ServerMessage::Error { .. } => "error",
            ServerMessage::NewViolation { .. } => "new_violation",
            ServerMessage::CameraStatusUpdate { .. } => "camera_status_update",
            ServerMessage::SystemAlert { .. } => "system_alert",
            ServerMessage::AnalyticsUpdate { .. } => "analytics_update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_type_lookup() {
        assert_eq!(ClientMessageType::parse("ping"), Some(ClientMessageType::Ping));
        assert_eq!(
            ClientMessageType::parse("request_data"),
            Some(ClientMessageType::RequestData)
        );
        assert_eq!(ClientMessageType::parse("publish"), None);
    }

    #[test]
    fn test_request_data_accepts_camel_case_field() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "request_data", "requestType": "camera_list"}))
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::RequestData {
                request_type: Some("camera_list".to_string())
            }
        );
    }

    #[test]
    fn test_heartbeat_ignores_extra_fields() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "heartbeat", "client_time": 12})).unwrap();
        assert_eq!(msg.message_type(), ClientMessageType::Heartbeat);
    }

    #[test]
    fn test_server_message_tags() {
        let value = serde_json::to_value(ServerMessage::heartbeat_ack()).unwrap();
        assert_eq!(value, json!({"type": "heartbeat_ack"}));

        let value = serde_json::to_value(ServerMessage::subscription_confirmed(vec![
            "alerts".to_string(),
        ]))
        .unwrap();
        assert_eq!(value["type"], "subscription_confirmed");
        assert_eq!(value["channels"], json!(["alerts"]));
    }

    #[test]
    fn test_type_name_matches_serialized_tag() {
        let messages = [
            ServerMessage::connected("c", Utc::now()),
            ServerMessage::pong(Value::Null),
            ServerMessage::heartbeat(Utc::now()),
            ServerMessage::error("boom"),
            ServerMessage::NewViolation { data: json!({}) },
            ServerMessage::CameraStatusUpdate { data: json!({}) },
        ];
        for msg in messages {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value["type"], msg.type_name());
        }
    }

    #[test]
    fn test_error_omits_empty_invalid_list() {
        let value = serde_json::to_value(ServerMessage::error("nope")).unwrap();
        assert!(value.get("invalid").is_none());
    }
}
