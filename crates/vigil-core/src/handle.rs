//! Connection handles.
//!
//! A [`ConnectionHandle`] is the only way the hub writes to a transport. All
//! frames for one connection go through a bounded queue drained by a single
//! writer task, so writes never interleave no matter how many broadcasts or
//! replies target the connection at once. Each queued frame carries a
//! oneshot that reports whether the write succeeded.
//!
//! Every send has a deadline, and closing a handle interrupts a write the
//! transport is stuck on. A client that stops reading therefore costs its
//! callers at most one send timeout.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use vigil_protocol::CloseFrame;
use vigil_transport::{FrameSink, TransportError};

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

/// Default time a frame may take from enqueue to transport acceptance.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer waits for the transport to take the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct Outbound {
    text: String,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

struct Shared {
    close: OnceLock<CloseFrame>,
    closed: CancellationToken,
}

/// Cloneable handle to one connection's writer.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
    send_timeout: Duration,
}

impl ConnectionHandle {
    /// Take ownership of `sink` and spawn its writer task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(sink: Box<dyn FrameSink>, queue: usize) -> Self {
        Self::spawn_with_timeout(sink, queue, DEFAULT_SEND_TIMEOUT)
    }

    /// Like [`ConnectionHandle::spawn`], with an explicit per-send deadline.
    #[must_use]
    pub fn spawn_with_timeout(
        sink: Box<dyn FrameSink>,
        queue: usize,
        send_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let shared = Arc::new(Shared {
            close: OnceLock::new(),
            closed: CancellationToken::new(),
        });

        tokio::spawn(run_writer(sink, rx, Arc::clone(&shared)));

        Self {
            tx,
            shared,
            send_timeout,
        }
    }

    /// Write a text frame and wait until the transport accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the handle was closed or
    /// the writer is gone, [`TransportError::Timeout`] if the frame was not
    /// accepted within the send timeout, or the transport's own error if the
    /// write failed.
    pub async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let (ack, done) = oneshot::channel();
        let deliver = async {
            self.tx
                .send(Outbound { text, ack })
                .await
                .map_err(|_| TransportError::ConnectionClosed)?;

            // A dropped ack means the writer shut down before reaching this frame.
            done.await.map_err(|_| TransportError::ConnectionClosed)?
        };

        tokio::select! {
            biased;

            result = timeout(self.send_timeout, deliver) => {
                result.unwrap_or(Err(TransportError::Timeout(self.send_timeout)))
            }
            _ = self.shared.closed.cancelled() => Err(TransportError::ConnectionClosed),
        }
    }

    /// Close the transport with `frame`.
    ///
    /// Only the first call has an effect; returns whether this call closed it.
    pub fn close(&self, frame: impl Into<CloseFrame>) -> bool {
        let first = self.shared.close.set(frame.into()).is_ok();
        self.shared.closed.cancel();
        first
    }

    /// Whether the handle was closed or its writer stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Wait until the handle is closed or its writer stops.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run_writer(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<Outbound>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shared.closed.cancelled() => break,

            item = rx.recv() => match item {
                Some(Outbound { text, ack }) => {
                    let result = tokio::select! {
                        biased;

                        _ = shared.closed.cancelled() => break,
                        result = sink.send_text(text) => result,
                    };
                    let failed = result.is_err();
                    if let Err(e) = &result {
                        debug!(error = %e, "Write failed, stopping writer");
                    }
                    let _ = ack.send(result);
                    if failed {
                        shared.closed.cancel();
                        break;
                    }
                }
                // Every handle was dropped
                None => break,
            },
        }
    }

    // Frames still queued are dropped; their senders see ConnectionClosed.
    rx.close();
    let frame = shared.close.get().cloned().unwrap_or_default();
    trace!(%frame, "Closing transport");
    match timeout(CLOSE_TIMEOUT, sink.close(frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Transport close failed"),
        Err(_) => debug!("Transport close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::CloseReason;
    use vigil_transport::memory::{duplex, PeerEvent, StalledSink};

    #[tokio::test]
    async fn test_send_reaches_peer_in_order() {
        let (sink, _stream, mut peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 4);

        for i in 0..10 {
            handle.send(format!("msg-{i}")).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(peer.recv_text().await, Some(format!("msg-{i}")));
        }
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (sink, _stream, mut peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 2);

        let sends = (0..20).map(|i| {
            let handle = handle.clone();
            async move { handle.send(format!("frame-{i}")).await }
        });
        let results = futures_util::future::join_all(sends).await;
        assert!(results.iter().all(Result::is_ok));

        let mut received: Vec<String> = Vec::new();
        for _ in 0..20 {
            received.push(peer.recv_text().await.unwrap());
        }
        received.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("frame-{i}")).collect();
        expected.sort();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_close_sends_frame_once() {
        let (sink, _stream, mut peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 4);

        assert!(handle.close(CloseReason::Stale));
        assert!(!handle.close(CloseReason::Normal));
        assert!(handle.is_closed());

        assert_eq!(
            peer.recv().await,
            Some(PeerEvent::Closed(CloseReason::Stale.into()))
        );
        assert!(matches!(
            handle.send("late".to_string()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_broken_transport_reports_failure() {
        let (sink, _stream, mut peer) = duplex();
        let handle = ConnectionHandle::spawn(Box::new(sink), 4);
        peer.break_transport();

        assert!(matches!(
            handle.send("x".to_string()).await,
            Err(TransportError::SendFailed(_))
        ));
        handle.closed().await;
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transport_times_out() {
        let handle =
            ConnectionHandle::spawn_with_timeout(Box::new(StalledSink), 4, Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        assert!(matches!(
            handle.send("x".to_string()).await,
            Err(TransportError::Timeout(_))
        ));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_interrupts_stuck_write() {
        let handle =
            ConnectionHandle::spawn_with_timeout(Box::new(StalledSink), 4, Duration::from_secs(60));

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send("stuck".to_string()).await }
        });
        tokio::task::yield_now().await;

        assert!(handle.close(CloseReason::Stale));
        assert!(matches!(
            pending.await.unwrap(),
            Err(TransportError::ConnectionClosed)
        ));
        assert!(matches!(
            handle.send("late".to_string()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
