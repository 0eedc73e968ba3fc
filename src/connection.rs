//! Connection handle shared between the read loop, the registry and the
//! router.
//!
//! A connection is a writer handle plus a close signal. Closing is
//! idempotent; the read loop watches the signal and tears the socket down.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{Result, SwitchError};
use crate::writer::{OutboundFrame, WriterHandle};

/// Transport-level connection id, unique for the process lifetime.
pub type ConnectionId = u64;

/// A live peer connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: String,
    writer: WriterHandle,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: impl Into<String>, writer: WriterHandle) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id,
            peer: peer.into(),
            writer,
            closed,
        })
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address as text.
    #[inline]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue a frame, waiting out backpressure.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_closed() {
            return Err(SwitchError::ConnectionClosed);
        }
        self.writer.send(frame).await
    }

    /// Queue a frame without waiting. Fails if the queue is full or the
    /// connection is closed.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_closed() {
            return Err(SwitchError::ConnectionClosed);
        }
        self.writer.try_send(frame)
    }

    /// Signal the read loop to drop this connection.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.writer.is_closed()
    }

    /// Receiver that observes [`Connection::close`].
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_heartbeat_response, LengthConvention};
    use crate::writer::WriterConfig;

    fn heartbeat() -> OutboundFrame {
        OutboundFrame::encode(&build_heartbeat_response(), LengthConvention::PayloadOnly).unwrap()
    }

    #[tokio::test]
    async fn test_send_reaches_writer() {
        let (writer, mut rx) = WriterHandle::detached(&WriterConfig::default());
        let conn = Connection::new(1, "127.0.0.1:9", writer);

        conn.send(heartbeat()).await.unwrap();
        conn.try_send(heartbeat()).unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (writer, _rx) = WriterHandle::detached(&WriterConfig::default());
        let conn = Connection::new(7, "peer", writer);
        let mut signal = conn.close_signal();

        assert!(!conn.is_closed());
        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());

        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (writer, _rx) = WriterHandle::detached(&WriterConfig::default());
        let conn = Connection::new(2, "peer", writer);
        conn.close();

        assert!(matches!(
            conn.try_send(heartbeat()),
            Err(SwitchError::ConnectionClosed)
        ));
        assert!(matches!(
            conn.send(heartbeat()).await,
            Err(SwitchError::ConnectionClosed)
        ));
    }
}
