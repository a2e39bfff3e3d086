//! # vigil-protocol
//!
//! Wire protocol definitions for the Vigil realtime hub.
//!
//! Every frame on the wire is a UTF-8 JSON object tagged by a `type` field.
//!
//! ## Client messages
//!
//! - `ping` - Echo request, answered with `pong`
//! - `subscribe` - Replace the connection's topic subscriptions
//! - `heartbeat` - Refresh the connection's liveness
//! - `request_data` - Ask a channel-specific data provider for a snapshot
//!
//! ## Server messages
//!
//! Server messages are stamped with a `timestamp` field just before they are
//! written to the transport.
//!
//! ## Example
//!
//! ```rust
//! use vigil_protocol::{codec, ClientMessage, ServerMessage};
//!
//! let msg = codec::decode(r#"{"type": "ping", "data": "x"}"#).unwrap();
//! assert_eq!(msg, ClientMessage::Ping { data: "x".into() });
//!
//! let text = codec::encode(&ServerMessage::pong("x".into()), chrono::Utc::now()).unwrap();
//! assert!(text.contains("\"timestamp\""));
//! ```

pub mod close;
pub mod codec;
pub mod frames;

pub use close::{CloseFrame, CloseReason};
pub use codec::{decode, encode, ProtocolError};
pub use frames::{ClientMessage, ClientMessageType, ServerMessage};
