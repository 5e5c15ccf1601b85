//! Connection over a duplex byte stream.
//!
//! A [`Connection`] splits into two halves with different owners:
//!
//! - [`MessageReader`] is owned by the stream dispatcher, the only reader.
//!   It yields decoded frames one at a time in arrival order.
//! - [`MessageSender`] is cheaply cloneable and shared by every caller that
//!   writes (calls, notifications, reverse-request replies). Frames go through
//!   the writer task, so concurrent sends never interleave bytes.
//!
//! Once [`MessageSender::close`] has been called, every clone fails sends
//! with [`RpcError::ConnectionClosed`] carrying the close cause.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::protocol::{Decoded, FrameBuffer, Message};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Size of the socket read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A connection attached to a live transport.
pub struct Connection<R> {
    reader: MessageReader<R>,
    sender: MessageSender,
    writer_task: JoinHandle<Result<()>>,
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    /// Attach to a transport. Spawns the writer task, so this must run
    /// inside a tokio runtime.
    pub fn new<W>(reader: R, writer: W, config: WriterConfig, max_frame_size: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (handle, writer_task) = spawn_writer_task(writer, config);
        Self {
            reader: MessageReader::new(reader, max_frame_size),
            sender: MessageSender::new(handle),
            writer_task,
        }
    }

    /// A sender for this connection.
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Split into the reading half, the writing half and the writer task.
    pub fn into_parts(self) -> (MessageReader<R>, MessageSender, JoinHandle<Result<()>>) {
        (self.reader, self.sender, self.writer_task)
    }
}

/// Reading half: decodes frames off the stream.
pub struct MessageReader<R> {
    reader: R,
    frames: FrameBuffer,
    ready: VecDeque<Decoded>,
    buf: Vec<u8>,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap a read half.
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader,
            frames: FrameBuffer::with_max_frame_size(max_frame_size),
            ready: VecDeque::new(),
            buf: vec![0u8; READ_BUFFER_SIZE],
        }
    }

    /// Next frame in arrival order.
    ///
    /// - `Ok(Some(Ok(msg)))`: a message
    /// - `Ok(Some(Err(e)))`: a frame that could not be interpreted (skip it)
    /// - `Ok(None)`: the peer closed the stream
    /// - `Err(e)`: I/O failure or unrecoverable bytes
    pub async fn next_message(&mut self) -> Result<Option<Decoded>> {
        loop {
            if let Some(decoded) = self.ready.pop_front() {
                return Ok(Some(decoded));
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                if !self.frames.is_empty() {
                    tracing::warn!(
                        "Stream closed with {} bytes of an incomplete frame",
                        self.frames.len()
                    );
                }
                return Ok(None);
            }

            self.ready.extend(self.frames.push(&self.buf[..n])?);
        }
    }
}

/// Writing half, shared by all senders.
#[derive(Clone)]
pub struct MessageSender {
    writer: WriterHandle,
    closed: Arc<Mutex<Option<String>>>,
}

impl MessageSender {
    fn new(writer: WriterHandle) -> Self {
        Self {
            writer,
            closed: Arc::new(Mutex::new(None)),
        }
    }

    /// Encode and enqueue a message.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let closed = self.closed.lock().clone();
        if let Some(cause) = closed {
            return Err(RpcError::ConnectionClosed(cause));
        }

        let bytes = message.encode()?;
        tracing::debug!("Sending message type {} ({} bytes)", message.kind(), bytes.len());
        self.writer.send(OutboundFrame::new(bytes)).await
    }

    /// Refuse all further sends. The first cause wins.
    pub fn close(&self, cause: &str) {
        let mut closed = self.closed.lock();
        if closed.is_none() {
            *closed = Some(cause.to_string());
        }
    }

    /// Whether [`close`](Self::close) was called or the writer task stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.lock().is_some() || self.writer.is_closed()
    }

    /// Frames enqueued but not yet written.
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }

    /// Whether the writer is currently applying backpressure.
    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }
}
