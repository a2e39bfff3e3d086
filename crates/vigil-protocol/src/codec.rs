//! Codec for encoding and decoding Vigil messages.
//!
//! Inbound frames are decoded in two steps so that malformed JSON, unknown
//! message types and structurally invalid messages can be told apart and
//! answered with distinct in-band errors.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::frames::{ClientMessage, ClientMessageType, ServerMessage};

/// Maximum inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Name of the field stamped onto every outbound message.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not valid JSON (or not UTF-8).
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// Binary frames carry no JSON.
    #[error("Unexpected binary frame of {0} bytes")]
    BinaryFrame(usize),

    /// Frame is valid JSON but not an object.
    #[error("Message is not a JSON object")]
    NotAnObject,

    /// The `type` field names no known message.
    #[error("Unknown message type: {}", .0.as_deref().unwrap_or("null"))]
    UnknownType(Option<String>),

    /// A known message type with invalid fields.
    #[error("Invalid {kind} message: {source}")]
    InvalidMessage {
        kind: ClientMessageType,
        #[source]
        source: serde_json::Error,
    },

    /// Outbound serialization error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ProtocolError {
    /// The text sent back to the client in an `error` message.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ProtocolError::InvalidJson(_)
            | ProtocolError::BinaryFrame(_)
            | ProtocolError::NotAnObject => {
                "Invalid JSON format".to_string()
            }
            ProtocolError::FrameTooLarge(size) => format!("Message too large: {size} bytes"),
            ProtocolError::UnknownType(_) => self.to_string(),
            ProtocolError::InvalidMessage { .. } | ProtocolError::Encode(_) => {
                "Message processing failed".to_string()
            }
        }
    }
}

/// Decode a client message from a text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not a JSON object, names an
/// unknown type, or has invalid fields for its type.
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    decode_value(value)
}

fn decode_value(value: Value) -> Result<ClientMessage, ProtocolError> {
    let object = value.as_object().ok_or(ProtocolError::NotAnObject)?;

    let kind = match object.get("type") {
        Some(Value::String(name)) => ClientMessageType::parse(name)
            .ok_or_else(|| ProtocolError::UnknownType(Some(name.clone())))?,
        Some(other) => return Err(ProtocolError::UnknownType(Some(other.to_string()))),
        None => return Err(ProtocolError::UnknownType(None)),
    };

    serde_json::from_value(value).map_err(|source| ProtocolError::InvalidMessage { kind, source })
}

/// Encode a server message, stamping it with `at` as the `timestamp` field.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ServerMessage, at: DateTime<Utc>) -> Result<String, ProtocolError> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(map) = &mut value {
        map.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    Ok(serde_json::to_string(&value)?)
}
