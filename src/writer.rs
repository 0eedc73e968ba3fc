//! Per-connection writer task.
//!
//! Every connection owns one writer task that drains an mpsc channel of
//! pre-encoded frames into the socket write half. Anything that wants to
//! talk to a peer (its own dispatcher, the router fanning out another
//! peer's data, the heartbeat path) goes through a cloned [`WriterHandle`].
//!
//! ```text
//! Dispatcher ──┐
//! Router     ──┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► TcpStream
//! Heartbeat  ──┘
//! ```
//!
//! - Frames queued back to back are written with one `write_vectored` call.
//! - A pending counter bounds the queue; `send` waits up to the
//!   backpressure timeout, `try_send` fails at once.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::{FrameError, Result, SwitchError};
use crate::protocol::{Frame, LengthConvention, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames drained from the queue per socket write.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
///
/// The header is encoded once with the switch's length convention. Cloning
/// shares the payload, which is how one published frame reaches many
/// targets.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for heartbeats).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Encode a frame's header and take its payload.
    #[inline]
    pub fn encode(frame: &Frame, convention: LengthConvention) -> std::result::Result<Self, FrameError> {
        Ok(Self {
            header: frame.header.encode(convention)?,
            payload: frame.payload.clone(),
        })
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    fn slices(&self) -> impl Iterator<Item = IoSlice<'_>> {
        let payload = (!self.payload.is_empty()).then(|| IoSlice::new(&self.payload));
        std::iter::once(IoSlice::new(&self.header)).chain(payload)
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Queue depth shared by the handles and the writer task.
#[derive(Debug, Default)]
struct Backlog {
    pending: AtomicUsize,
    /// Signalled every time the writer task drains a batch.
    drained: Notify,
}

impl Backlog {
    fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn add(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn remove(&self, n: usize) {
        self.pending.fetch_sub(n, Ordering::AcqRel);
        self.drained.notify_waiters();
    }
}

/// Handle for queueing frames on one connection.
///
/// Cheap to clone: the connection's dispatcher and every router that fans
/// data out to it hold one.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    backlog: Arc<Backlog>,
    max_pending: usize,
    timeout: Duration,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("pending", &self.pending_count())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundFrame>, backlog: Arc<Backlog>, config: &WriterConfig) -> Self {
        Self {
            tx,
            backlog,
            max_pending: config.max_pending_frames,
            timeout: config.backpressure_timeout,
        }
    }

    /// Create a handle whose frames land in the returned receiver instead of
    /// a socket. Nothing drains the receiver unless the caller does.
    pub fn detached(config: &WriterConfig) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        (Self::new(tx, Arc::default(), config), rx)
    }

    /// Queue a frame, waiting up to the backpressure timeout for room.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            self.wait_for_room().await?;
        }

        self.backlog.add();
        if self.tx.send(frame).await.is_err() {
            self.backlog.remove(1);
            return Err(SwitchError::ConnectionClosed);
        }
        Ok(())
    }

    /// Queue a frame or fail at once.
    ///
    /// A full queue is reported as [`SwitchError::BackpressureTimeout`].
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(SwitchError::BackpressureTimeout);
        }

        self.backlog.add();
        self.tx.try_send(frame).map_err(|e| {
            self.backlog.remove(1);
            match e {
                mpsc::error::TrySendError::Full(_) => SwitchError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => SwitchError::ConnectionClosed,
            }
        })
    }

    async fn wait_for_room(&self) -> Result<()> {
        let room = async {
            loop {
                let drained = self.backlog.drained.notified();
                if !self.is_backpressure_active() {
                    return;
                }
                drained.await;
            }
        };
        tokio::time::timeout(self.timeout, room)
            .await
            .map_err(|_| SwitchError::BackpressureTimeout)
    }

    /// Whether the writer task is gone.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.backlog.len() >= self.max_pending
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.backlog.len()
    }
}

/// Spawn the writer task for `writer`.
///
/// The task ends with `Ok(())` once every handle is dropped and the queue
/// is flushed, or with the first write error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let backlog = Arc::new(Backlog::default());
    let handle = WriterHandle::new(tx, Arc::clone(&backlog), &config);
    let task = tokio::spawn(writer_loop(rx, writer, backlog));
    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    backlog: Arc<Backlog>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    while rx.recv_many(&mut batch, MAX_BATCH_SIZE).await > 0 {
        write_batch(&mut writer, &batch).await?;
        backlog.remove(batch.len());
        batch.clear();
    }
    Ok(())
}

/// Write every frame of `batch` with vectored writes, then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut slices: Vec<IoSlice<'_>> = batch.iter().flat_map(OutboundFrame::slices).collect();
    let mut remaining: &mut [IoSlice<'_>] = &mut slices;

    while !remaining.is_empty() {
        let written = writer.write_vectored(remaining).await?;
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        IoSlice::advance_slices(&mut remaining, written);
    }

    writer.flush().await?;
    Ok(())
}
