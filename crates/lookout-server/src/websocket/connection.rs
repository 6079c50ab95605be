//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lookout_core::{CloseReason, OutboundMessage, SessionId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Item queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(Arc<String>),
    /// Liveness ping.
    Ping,
}

/// Why an item could not be queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// Queue is at capacity; the peer is slow.
    Full,
    /// Writer is gone or the connection was closed.
    Closed,
}

/// Server side of one WebSocket connection.
///
/// Writes never block: everything goes through a bounded queue drained by
/// the session's writer task. Closing cancels the connection token; the
/// writer then sends a close frame carrying the recorded reason.
pub struct ClientConnection {
    id: SessionId,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(id: SessionId, tx: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Self {
        Self {
            id,
            tx,
            cancel,
            close_reason: Mutex::new(None),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Session id assigned at registration.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    fn enqueue(&self, item: Outbound) -> Result<(), SendFailure> {
        if self.cancel.is_cancelled() {
            return Err(SendFailure::Closed);
        }
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Queue a text frame.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        match self.enqueue(Outbound::Text(message)) {
            Ok(()) => true,
            Err(failure) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                if failure == SendFailure::Full {
                    warn!(session_id = %self.id, "send queue full, dropping message");
                }
                false
            }
        }
    }

    /// Serialize a protocol message and queue it.
    pub fn send_message(&self, message: &OutboundMessage) -> bool {
        match message.to_json() {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to encode outbound message");
                false
            }
        }
    }

    /// Queue a liveness ping.
    pub fn ping(&self) -> Result<(), SendFailure> {
        self.enqueue(Outbound::Ping)
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Close the connection. The first reason recorded wins.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    /// Reason passed to the first `close` call, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Token cancelled when the connection closes.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether frames can still be queued.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(
            SessionId::from_raw("peer_1"),
            tx,
            CancellationToken::new(),
        );
        (conn, rx)
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(rx.recv().await.unwrap(), Outbound::Text(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn send_to_closed_channel_returns_false() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.ping(), Err(SendFailure::Closed));
        assert!(!conn.is_open());
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn full_queue_is_reported_as_full() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("a".into())));
        assert!(!conn.send(Arc::new("b".into())));
        assert_eq!(conn.ping(), Err(SendFailure::Full));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_message_encodes_json() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send_message(&OutboundMessage::error("nope")));
        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "nope");
    }

    #[test]
    fn first_close_reason_wins() {
        let (conn, _rx) = make_connection(8);
        conn.close(CloseReason::Superseded);
        conn.close(CloseReason::HeartbeatTimeout);
        assert_eq!(conn.close_reason(), Some(CloseReason::Superseded));
        assert!(conn.token().is_cancelled());
        assert!(!conn.is_open());
        assert!(!conn.send(Arc::new("late".into())));
    }
}
