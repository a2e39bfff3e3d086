//! WebSocket transport implementation.
//!
//! This module adapts an upgraded axum [`WebSocket`] into a
//! [`FrameSink`]/[`FrameStream`] pair.

use std::borrow::Cow;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ws::{self, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};
use vigil_protocol::CloseFrame;

use crate::traits::{FrameSink, FrameStream, InboundFrame, TransportError};

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Split an upgraded WebSocket into its outbound and inbound halves.
#[must_use]
pub fn split(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
) -> (WebSocketSink, WebSocketStream) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink {
            inner: sink,
            remote_addr,
            closed: false,
        },
        WebSocketStream {
            inner: stream,
            max_message_size,
        },
    )
}

/// Outbound half of a WebSocket session.
pub struct WebSocketSink {
    inner: SplitSink<WebSocket, Message>,
    remote_addr: Option<SocketAddr>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError> {
        if self.closed {
            return Ok(()); // Already closed
        }
        self.closed = true;

        debug!(code = frame.code, reason = %frame.reason, "Sending close frame");
        let close = ws::CloseFrame {
            code: frame.code,
            reason: Cow::Owned(frame.reason),
        };
        let sent = self
            .inner
            .send(Message::Close(Some(close)))
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")));

        if let Err(e) = self.inner.close().await {
            debug!(error = %e, "Sink close after close frame failed");
        }
        sent
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

/// Inbound half of a WebSocket session.
pub struct WebSocketStream {
    inner: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketStream {
    fn check_size(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_message_size {
            warn!(size, max = self.max_message_size, "Message too large");
            return Err(TransportError::FrameTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FrameStream for WebSocketStream {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(InboundFrame::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return Ok(Some(InboundFrame::Binary(Bytes::from(data))));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Control frames are answered by the WebSocket layer
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive error");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
