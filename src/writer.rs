//! Dedicated writer task for outbound frames.
//!
//! The connection's processing context never writes to the transport
//! itself. Encoded frames go through an mpsc channel to a writer task that
//! batches whatever is ready into a single vectored write.
//!
//! ```text
//! read loop ─► Connection ─► WriterHandle ─► mpsc ─► writer task ─► transport
//! ```
//!
//! Dropping every [`WriterHandle`] ends the task after all queued frames
//! are written, then the transport is shut down.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BrokerError, Result};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Encoded bytes ready for the transport: a frame's header, performative
/// and payload buffers, or the protocol header.
#[derive(Debug, Clone, Default)]
pub struct OutboundFrame {
    pub parts: Vec<Bytes>,
}

impl OutboundFrame {
    #[inline]
    pub fn new(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }

    /// Total size of all parts.
    #[inline]
    pub fn size(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(Bytes::is_empty)
    }
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames queued before `send` waits.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames sent but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a frame. Waits while the channel is full.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if frame.is_empty() {
            return Ok(());
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            BrokerError::ConnectionClosed
        })
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The JoinHandle resolves once every handle is dropped and the queued
/// frames are written and flushed.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));
    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, pending));
    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;
        pending.fetch_sub(batch_size, Ordering::Release);
    }

    tracing::trace!("writer channel closed, shutting down transport");
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames with as few `write_vectored` calls as the
/// transport allows.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    if total_size == 0 {
        return Ok(());
    }

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BrokerError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices for everything after the first `skip_bytes` of the batch.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::new();
    let mut offset = 0;

    for part in batch.iter().flat_map(|f| f.parts.iter()) {
        let start = offset;
        let end = offset + part.len();
        offset = end;
        if part.is_empty() || skip_bytes >= end {
            continue;
        }
        let skip_in_part = skip_bytes.saturating_sub(start);
        slices.push(IoSlice::new(&part[skip_in_part..]));
    }

    slices
}
