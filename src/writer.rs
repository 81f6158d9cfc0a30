//! Dedicated writer task for one socket.
//!
//! Every socket (control channel or data channel) gets one writer task fed
//! through an mpsc channel. Callers never hold a lock across socket I/O and
//! each queued frame reaches the peer whole, never interleaved with another.
//!
//! # Architecture
//!
//! ```text
//! Caller threads ─┐
//! Event callbacks ┼─► mpsc::UnboundedSender<Command> ─► Writer Task ─► Socket
//! Frame drops    ─┘
//! ```
//!
//! The channel is unbounded so synchronous contexts (drop glue, engine
//! callbacks on foreign threads) can enqueue with [`WriterHandle::send_now`].
//! Async callers use [`WriterHandle::send`], which honours the pending-frame
//! limit.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{PlayerWireError, Result};
use crate::protocol::{Header, Message, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A unit of output: an encoded header plus body, or raw bytes.
#[derive(Debug)]
pub struct OutboundFrame {
    header: [u8; HEADER_SIZE],
    header_len: usize,
    body: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, body: Bytes) -> Self {
        Self {
            header: header.encode(),
            header_len: HEADER_SIZE,
            body,
        }
    }

    /// Encode a message into a frame.
    pub fn from_message(msg: &Message) -> Result<Self> {
        let body = msg.encode_body()?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| PlayerWireError::Protocol("body too large".to_string()))?;
        let header = Header::new(msg.api_id, msg.kind.to_flags(), msg.seq, body_len);
        Ok(Self::new(&header, body.freeze()))
    }

    /// Unframed bytes for the data channel.
    #[inline]
    pub fn raw(bytes: Bytes) -> Self {
        Self {
            header: [0; HEADER_SIZE],
            header_len: 0,
            body: bytes,
        }
    }

    #[inline]
    fn header(&self) -> &[u8] {
        &self.header[..self.header_len]
    }

    /// Total size of this frame (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        self.header_len + self.body.len()
    }
}

enum Command {
    Frame(OutboundFrame),
    Shutdown,
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across threads.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<Command>,
    /// Pending frame count (for backpressure).
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::UnboundedSender<Command>,
        pending: Arc<AtomicUsize>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, timing out after the configured
    /// duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            self.wait_for_backpressure().await?;
        }
        self.send_now(frame)
    }

    /// Encode and send a message.
    pub async fn send_message(&self, msg: &Message) -> Result<()> {
        self.send(OutboundFrame::from_message(msg)?).await
    }

    /// Enqueue a frame without waiting. Usable from synchronous code.
    pub fn send_now(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(Command::Frame(frame)).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            PlayerWireError::ConnectionLost
        })
    }

    /// Encode and enqueue a message without waiting.
    pub fn send_message_now(&self, msg: &Message) -> Result<()> {
        self.send_now(OutboundFrame::from_message(msg)?)
    }

    /// Try to send a frame, failing immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(PlayerWireError::BackpressureTimeout);
        }
        self.send_now(frame)
    }

    /// Ask the writer to flush queued frames, shut the socket down, and exit.
    ///
    /// Frames queued before this call are still written.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Whether the writer task is gone.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();
        let check_interval = Duration::from_micros(100);

        loop {
            if self.pending.load(Ordering::Acquire) < self.max_pending {
                return Ok(());
            }
            if self.is_closed() {
                return Err(PlayerWireError::ConnectionLost);
            }
            if start.elapsed() > self.timeout {
                return Err(PlayerWireError::BackpressureTimeout);
            }
            tokio::time::sleep(check_interval).await;
        }
    }

    /// Check if backpressure is currently active.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves when the writer exits: after
/// [`WriterHandle::close`], after every handle is dropped, or on the
/// first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        pending.clone(),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = false;
    while !shutdown {
        let first = match rx.recv().await {
            Some(Command::Frame(f)) => f,
            Some(Command::Shutdown) | None => break,
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Command::Frame(frame)) => batch.push(frame),
                Ok(Command::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);
        if let Err(e) = result {
            tracing::error!("writer failed: {}", e);
            return Err(e);
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch with as few `write_vectored` calls as the socket allows.
///
/// Partial writes resume from the first unwritten byte; frames are never
/// reordered or split across batches.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let parts: Vec<&[u8]> = batch
        .iter()
        .flat_map(|frame| [frame.header(), &frame.body[..]])
        .filter(|part| !part.is_empty())
        .collect();
    let total: usize = parts.iter().map(|part| part.len()).sum();

    let mut written = 0;
    while written < total {
        let slices = unwritten_slices(&parts, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(PlayerWireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "socket accepted no bytes",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices covering everything in `parts` past the first `skip` bytes.
fn unwritten_slices<'a>(parts: &[&'a [u8]], mut skip: usize) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(parts.len());
    for part in parts {
        if skip >= part.len() {
            skip -= part.len();
            continue;
        }
        slices.push(IoSlice::new(&part[skip..]));
        skip = 0;
    }
    slices
}
