//! In-memory transport.
//!
//! [`duplex`] returns a sink/stream pair plus a [`MemoryPeer`] that plays
//! the client: it reads whatever the server wrote, injects inbound frames,
//! and can hang up or break the session to simulate network failures.
//! [`StalledSink`] stands in for a client that never drains its socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use vigil_protocol::CloseFrame;

use crate::traits::{FrameSink, FrameStream, InboundFrame, TransportError};

/// Something the server did to the session, as observed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A text frame was written.
    Text(String),
    /// The session was closed.
    Closed(CloseFrame),
}

#[derive(Debug, Default)]
struct SessionState {
    broken: AtomicBool,
    closed: AtomicBool,
}

/// Create an in-memory session.
#[must_use]
pub fn duplex() -> (MemorySink, MemoryStream, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let state = Arc::new(SessionState::default());

    (
        MemorySink {
            tx: out_tx,
            state: Arc::clone(&state),
        },
        MemoryStream {
            rx: in_rx,
            state: Arc::clone(&state),
        },
        MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
            state,
        },
    )
}

/// Server-side outbound half of an in-memory session.
#[derive(Debug)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<PeerEvent>,
    state: Arc<SessionState>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.state.broken.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(PeerEvent::Text(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self, frame: CloseFrame) -> Result<(), TransportError> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The peer may already be gone; closing still succeeds.
        let _ = self.tx.send(PeerEvent::Closed(frame));
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// A sink whose peer stopped reading: writes and closes never complete.
#[derive(Debug, Default)]
pub struct StalledSink;

#[async_trait]
impl FrameSink for StalledSink {
    async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn close(&mut self, _frame: CloseFrame) -> Result<(), TransportError> {
        std::future::pending().await
    }
}

/// Server-side inbound half of an in-memory session.
#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<InboundFrame>,
    state: Arc<SessionState>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        match self.rx.recv().await {
            Some(frame) => Ok(Some(frame)),
            None if self.state.broken.load(Ordering::SeqCst) => {
                Err(TransportError::ReceiveFailed("connection reset".into()))
            }
            None => Ok(None),
        }
    }
}

/// The client end of an in-memory session.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<InboundFrame>>,
    outbound: mpsc::UnboundedReceiver<PeerEvent>,
    state: Arc<SessionState>,
}

impl MemoryPeer {
    /// Send a text frame to the server.
    ///
    /// Returns `false` if the peer has hung up.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(InboundFrame::Text(text.into()))
    }

    /// Send any frame to the server.
    pub fn send_frame(&self, frame: InboundFrame) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Hang up cleanly: the server's stream yields `None`.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Break the session: sends fail and the server's stream yields an error.
    pub fn break_transport(&mut self) {
        self.state.broken.store(true, Ordering::SeqCst);
        self.inbound = None;
    }

    /// Whether the server has closed the session.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Wait for the next server event.
    ///
    /// Returns `None` once the server side has been dropped and all events
    /// were consumed.
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.outbound.recv().await
    }

    /// Take the next server event if one is ready.
    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.outbound.try_recv().ok()
    }

    /// Wait for the next text frame, skipping nothing.
    ///
    /// Returns `None` if the next event is a close or the session ended.
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await? {
            PeerEvent::Text(text) => Some(text),
            PeerEvent::Closed(_) => None,
        }
    }

    /// Wait for the close frame, discarding any text frames before it.
    pub async fn recv_close(&mut self) -> Option<CloseFrame> {
        while let Some(event) = self.recv().await {
            if let PeerEvent::Closed(frame) = event {
                return Some(frame);
            }
        }
        None
    }

    /// Drain every event that is ready right now.
    pub fn drain(&mut self) -> Vec<PeerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::CloseReason;

    #[tokio::test]
    async fn test_text_reaches_peer() {
        let (mut sink, _stream, mut peer) = duplex();
        sink.send_text("hello".to_string()).await.unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_peer_frames_reach_stream() {
        let (_sink, mut stream, mut peer) = duplex();
        assert!(peer.send_text("{}"));
        assert_eq!(
            stream.recv().await.unwrap(),
            Some(InboundFrame::Text("{}".to_string()))
        );

        peer.disconnect();
        assert_eq!(stream.recv().await.unwrap(), None);
        assert!(!peer.send_text("late"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut sink, _stream, mut peer) = duplex();
        sink.close(CloseReason::LimitExceeded.into()).await.unwrap();
        sink.close(CloseReason::Normal.into()).await.unwrap();

        assert!(peer.is_closed());
        assert_eq!(peer.recv_close().await.map(|f| f.code), Some(4001));
        assert!(peer.try_recv().is_none());
        assert!(matches!(
            sink.send_text("x".to_string()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_broken_transport() {
        let (mut sink, mut stream, mut peer) = duplex();
        peer.break_transport();

        assert!(matches!(
            sink.send_text("x".to_string()).await,
            Err(TransportError::SendFailed(_))
        ));
        assert!(matches!(
            stream.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }
}
