//! Transport abstraction traits for Vigil.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the hub to be transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use vigil_protocol::CloseFrame;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The session did not accept a frame in time.
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    /// Inbound frame exceeds the configured limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A data frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

/// The outbound half of a transport session.
///
/// A sink is driven by exactly one task, so writes to a session never
/// interleave.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the session with a close code and reason.
    ///
    /// Closing an already closed sink is a no-op.
    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError>;

    /// Get the remote address of the session, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The inbound half of a transport session.
#[async_trait]
pub trait FrameStream: Send {
    /// Receive the next data frame.
    ///
    /// Returns `None` if the session is closed cleanly. Control frames are
    /// handled by the implementation and never surface here.
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError>;
}
