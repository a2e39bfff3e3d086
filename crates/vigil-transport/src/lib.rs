//! # vigil-transport
//!
//! Transport abstraction layer for the Vigil realtime hub.
//!
//! A transport session is split into two halves:
//!
//! - [`FrameSink`] - the outbound half, owned by the connection's writer task
//! - [`FrameStream`] - the inbound half, owned by the connection's read loop
//!
//! Implementations:
//!
//! - **WebSocket** - axum WebSocket upgrade (feature `websocket`)
//! - **Memory** - an in-process duplex used by tests and benchmarks
//!
//! ```rust,ignore
//! use vigil_transport::{FrameStream, InboundFrame};
//!
//! async fn read_all(mut stream: Box<dyn FrameStream>) {
//!     while let Ok(Some(frame)) = stream.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameSink, FrameStream, InboundFrame, TransportError};
