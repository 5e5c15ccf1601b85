//! Client builder and runtime wiring.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring execution and
//! limits. Attaching it to a transport:
//! 1. Splits the stream into a reader and a writer
//! 2. Spawns the writer task
//! 3. Creates the RPC client and the handler proxy
//! 4. Spawns the stream dispatcher
//!
//! # Example
//!
//! ```ignore
//! use nvim_rpc::{Client, Notification};
//! use tokio::net::UnixStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stream = UnixStream::connect("/tmp/nvim.sock").await?;
//!     let client = Client::builder()
//!         .spawn_handlers(64)
//!         .call_timeout(std::time::Duration::from_secs(5))
//!         .attach_io(stream);
//!
//!     client.handlers().add_notification_handler(|n: Notification| async move {
//!         println!("{} {:?}", n.method, n.params);
//!         Ok(())
//!     });
//!
//!     let line = client.call("nvim_get_current_line", vec![]).await?;
//!     println!("{}", line);
//!
//!     client.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rmpv::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::atomic::{AtomicCallBuilder, AtomicOutcome};
use crate::connection::{Connection, MessageSender};
use crate::dispatcher::StreamDispatcher;
use crate::error::Result;
use crate::handler::{Executor, HandlerProxy, ImmediateExecutor, SpawnExecutor};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::rpc::{ResponseHandle, RpcClient, RpcConfig};
use crate::writer::WriterConfig;

/// Cause reported to outstanding calls when the [`Client`] is dropped.
pub const DROP_CAUSE: &str = "client dropped";

/// Builder for configuring and attaching a client.
pub struct ClientBuilder {
    executor: Arc<dyn Executor>,
    rpc_config: RpcConfig,
    writer_config: WriterConfig,
    max_frame_size: usize,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            executor: Arc::new(ImmediateExecutor),
            rpc_config: RpcConfig::default(),
            writer_config: WriterConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the handler execution policy.
    ///
    /// Default: [`ImmediateExecutor`], which runs handlers on the read loop.
    pub fn executor<E: Executor>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Run handlers on spawned tasks, at most `max_concurrent` at a time.
    pub fn spawn_handlers(self, max_concurrent: usize) -> Self {
        self.executor(SpawnExecutor::new(max_concurrent))
    }

    /// Set the maximum number of calls awaiting a response.
    ///
    /// Default: 8192
    pub fn max_pending_calls(mut self, limit: usize) -> Self {
        self.rpc_config.max_pending_calls = limit;
        self
    }

    /// Set the timeout applied by `call`.
    ///
    /// Default: none
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_config.call_timeout = Some(timeout);
        self
    }

    /// Set the maximum size of a single inbound frame.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// When this limit is reached, sends wait until backpressure clears or
    /// timeout.
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Attach to a transport given as separate halves.
    ///
    /// Must be called inside a tokio runtime.
    pub fn attach<R, W>(self, reader: R, writer: W) -> Client
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let connection = Connection::new(reader, writer, self.writer_config, self.max_frame_size);
        let (reader, sender, writer_task) = connection.into_parts();

        let rpc = RpcClient::new(sender.clone(), self.rpc_config);
        let handlers = Arc::new(HandlerProxy::new(self.executor));

        let dispatcher = StreamDispatcher::new(reader, rpc.clone(), handlers.clone(), sender.clone());
        let dispatcher_task = dispatcher.spawn();

        tracing::debug!("Client attached");

        Client {
            rpc,
            handlers,
            sender,
            dispatcher_task,
            _writer_task: writer_task,
        }
    }

    /// Attach to a single duplex stream (socket, child stdio pair, ...).
    pub fn attach_io<T>(self, io: T) -> Client
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        self.attach(reader, writer)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A client attached to a running peer.
///
/// Use `call()` and `notify()` to talk to the peer, `handlers()` to observe
/// what it pushes, and `wait_for_shutdown()` to block until the stream ends.
pub struct Client {
    rpc: RpcClient,
    handlers: Arc<HandlerProxy>,
    sender: MessageSender,
    dispatcher_task: JoinHandle<String>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The correlation engine.
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// The handler proxy for notifications and reverse requests.
    pub fn handlers(&self) -> &Arc<HandlerProxy> {
        &self.handlers
    }

    /// Call a remote method and wait for its result.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.rpc.call(method, params).await
    }

    /// Send a request and return a handle to its result.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<ResponseHandle> {
        self.rpc.request(method, params).await
    }

    /// Send a notification.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        self.rpc.notify(method, params).await
    }

    /// Send a batch of calls as one atomic request.
    pub async fn call_atomic(&self, batch: AtomicCallBuilder) -> Result<AtomicOutcome> {
        batch.send(&self.rpc).await
    }

    /// Close the client: fail pending calls with `ConnectionClosed(cause)`,
    /// stop reading and signal the handlers.
    pub fn shutdown(&self, cause: &str) {
        self.rpc.shutdown(cause);
        self.dispatcher_task.abort();
        self.handlers.source_closed(cause);
    }

    /// Whether the client has been shut down or the stream has ended.
    pub fn is_closed(&self) -> bool {
        self.rpc.is_closed()
    }

    /// Get the current backpressure status.
    pub fn is_backpressure_active(&self) -> bool {
        self.sender.is_backpressure_active()
    }

    /// Get the current pending frame count.
    pub fn pending_frames(&self) -> usize {
        self.sender.pending_frames()
    }

    /// Wait until the stream ends or `shutdown` is called.
    ///
    /// This consumes the client and returns the close cause.
    pub async fn wait_for_shutdown(self) -> String {
        self.handlers.closed().await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Clones of the RpcClient may outlive us; nothing would answer them
        self.shutdown(DROP_CAUSE);
    }
}
