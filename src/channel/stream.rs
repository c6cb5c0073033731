//! Channel endpoint over a byte stream (pipes, sockets, child stdio).
//!
//! # Architecture
//!
//! ```text
//! post() ─► encode ─► mpsc<OutboundFrame> ─► writer task ─► AsyncWrite
//! AsyncRead ─► read loop ─► FrameBuffer ─► decode ─► Inbox
//! ```
//!
//! `post` encodes the envelope on the caller's stack, so an unencodable
//! value fails the send instead of disappearing inside the writer task.
//! The writer task batches whatever is queued into one vectored write.
//!
//! Transferred items cannot be moved across a byte stream; they are copied
//! into the frame payload and rebuilt on the other side.

use std::io::IoSlice;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Channel, Inbox, Port};
use crate::error::{Result, WorkwireError};
use crate::protocol::{encode_envelope, Envelope, FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default maximum frames written in one vectored write.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 64;

/// Configuration for stream channels.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Largest accepted frame payload, in both directions.
    pub max_payload_size: u32,
    /// Size of the buffer each read fills.
    pub read_buffer_size: usize,
    /// Maximum frames coalesced into one write.
    pub max_batch_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl StreamConfig {
    /// Set the maximum frame payload size.
    pub fn max_payload_size(mut self, limit: u32) -> Self {
        self.max_payload_size = limit;
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the maximum write batch.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }
}

/// A frame ready to be written.
#[derive(Debug)]
struct OutboundFrame {
    header: [u8; HEADER_SIZE],
    payload: Bytes,
}

impl OutboundFrame {
    fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Port that frames envelopes onto the writer task's queue.
pub struct StreamPort {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    max_payload_size: u32,
}

impl Port for StreamPort {
    fn post(&self, envelope: Envelope) -> Result<()> {
        let (header, payload) = encode_envelope(&envelope)?;
        if payload.len() > self.max_payload_size as usize {
            return Err(WorkwireError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                self.max_payload_size
            )));
        }

        tracing::trace!(id = %envelope.message.id(), bytes = payload.len(), "stream post");
        self.tx
            .send(OutboundFrame { header, payload })
            .map_err(|_| WorkwireError::ChannelClosed)
    }
}

/// Build a channel endpoint on top of a reader and a writer.
///
/// Spawns the writer task and the read loop; must be called inside a
/// tokio runtime. Both tasks stop on their own: the writer once every
/// clone of the port is dropped (it then shuts the writer down so the
/// peer sees EOF), the read loop on EOF, on a fatal framing error, or
/// once the inbox is dropped.
pub fn connect<R, W>(reader: R, writer: W, config: StreamConfig) -> Channel
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (channel, _writer_task, _read_task) = connect_with_tasks(reader, writer, config);
    channel
}

/// Like [`connect`], also returning the writer and reader task handles.
pub fn connect_with_tasks<R, W>(
    reader: R,
    writer: W,
    config: StreamConfig,
) -> (Channel, JoinHandle<Result<()>>, JoinHandle<Result<()>>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

    let max_payload_size = config.max_payload_size;
    let writer_task = tokio::spawn(writer_loop(frame_rx, writer, config.max_batch_size));
    let read_task = tokio::spawn(async move {
        let result = read_loop(reader, inbox_tx, &config).await;
        if let Err(e) = &result {
            tracing::error!("Stream read loop error: {}", e);
        }
        result
    });

    let port = StreamPort {
        tx: frame_tx,
        max_payload_size,
    };
    let channel = Channel::new(Arc::new(port), Inbox::new(inbox_rx));
    (channel, writer_task, read_task)
}

/// Reads frames and forwards decoded envelopes to the inbox.
async fn read_loop<R>(
    mut reader: R,
    inbox: mpsc::UnboundedSender<Envelope>,
    config: &StreamConfig,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_payload(config.max_payload_size);
    let mut buf = vec![0u8; config.read_buffer_size.max(HEADER_SIZE)];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if frames.is_mid_frame() {
                tracing::warn!("Stream closed mid-frame ({} bytes buffered)", frames.len());
            }
            return Ok(());
        }

        for frame in frames.push(&buf[..n])? {
            let id = frame.id();
            match frame.into_envelope() {
                Ok(envelope) => {
                    if inbox.send(envelope).is_err() {
                        // Inbox dropped, nobody is listening any more.
                        return Ok(());
                    }
                }
                Err(e) => tracing::warn!("Dropping undecodable frame {}: {}", id, e),
            }
        }
    }
}

/// Receives frames and writes them in batches.
async fn writer_loop<W>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
    max_batch_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(max_batch_size);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < max_batch_size {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("Stream writer error: {}", e);
            return Err(e);
        }
        batch.clear();
    }

    // Every port is gone: signal EOF to the peer.
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames with as few vectored writes as the sink allows.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut parts: Vec<&[u8]> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        parts.push(&frame.header);
        if !frame.payload.is_empty() {
            parts.push(&frame.payload);
        }
    }

    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(&parts, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(WorkwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering `parts` with the first `skip` bytes removed.
fn remaining_slices<'a>(parts: &[&'a [u8]], mut skip: usize) -> Vec<IoSlice<'a>> {
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
