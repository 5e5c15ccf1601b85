//! Request/response correlation.
//!
//! [`RpcClient`] assigns ids, keeps one pending entry per outstanding request
//! and resolves it when the stream dispatcher hands over the matching
//! [`Response`]. Id allocation and the pending-map insert happen under one
//! lock, so two pending calls can never share an id.
//!
//! Every request resolves exactly once: by its response, by
//! [`RpcClient::shutdown`], or by the caller giving up (dropping the
//! [`ResponseHandle`] or letting its timeout elapse), which evicts the entry.
//!
//! # Example
//!
//! ```ignore
//! let handle = rpc.request("nvim_get_current_line", vec![]).await?;
//! let line = handle.with_timeout(Duration::from_secs(1)).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use rmpv::Value;
use tokio::sync::oneshot;

use crate::connection::MessageSender;
use crate::error::{Result, RpcError};
use crate::protocol::{Message, Notification, Request, Response};

/// Default maximum number of calls awaiting a response.
pub const DEFAULT_MAX_PENDING_CALLS: usize = 8192;

/// Configuration for the correlation engine.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Calls beyond this many outstanding ones fail with `TooManyPending`.
    pub max_pending_calls: usize,
    /// Timeout applied by [`RpcClient::call`]. `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
            call_timeout: None,
        }
    }
}

struct PendingCall {
    method: String,
    /// Distinguishes reuses of the same id.
    seq: u64,
    tx: oneshot::Sender<Result<Value>>,
}

struct State {
    pending: HashMap<u32, PendingCall>,
    next_id: u32,
    next_seq: u64,
    closed: Option<String>,
}

impl State {
    /// Next id not held by a pending call. Terminates because the pending
    /// map is bounded well below `u32::MAX`.
    fn allocate_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }
}

struct Inner {
    sender: MessageSender,
    state: Mutex<State>,
    config: RpcConfig,
}

impl Inner {
    fn evict(&self, id: u32, seq: u64) {
        let mut state = self.state.lock();
        if state.pending.get(&id).is_some_and(|call| call.seq == seq) {
            state.pending.remove(&id);
            tracing::debug!("Evicted pending call {}", id);
        }
    }
}

/// Correlation engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Create a client that writes through `sender`.
    pub fn new(sender: MessageSender, config: RpcConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                sender,
                state: Mutex::new(State {
                    pending: HashMap::new(),
                    next_id: 1,
                    next_seq: 0,
                    closed: None,
                }),
                config,
            }),
        }
    }

    /// Send a request and return a handle to its eventual result.
    ///
    /// Returns once the frame is handed to the writer, without waiting for
    /// the round trip.
    ///
    /// # Errors
    ///
    /// - [`RpcError::ConnectionClosed`] after shutdown (nothing is sent)
    /// - [`RpcError::TooManyPending`] when the pending limit is reached
    /// - any error from the writer
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<ResponseHandle> {
        let (tx, rx) = oneshot::channel();

        let (id, seq) = {
            let mut state = self.inner.state.lock();
            if let Some(cause) = &state.closed {
                return Err(RpcError::ConnectionClosed(cause.clone()));
            }
            let limit = self.inner.config.max_pending_calls;
            if state.pending.len() >= limit {
                return Err(RpcError::TooManyPending(limit));
            }

            let id = state.allocate_id();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                id,
                PendingCall {
                    method: method.to_string(),
                    seq,
                    tx,
                },
            );
            (id, seq)
        };

        // Dropping the handle on any early exit evicts the entry.
        let handle = ResponseHandle {
            rx,
            id,
            seq,
            method: method.to_string(),
            inner: self.inner.clone(),
            finished: false,
        };

        tracing::debug!("Request {} -> {}", id, method);
        self.inner
            .sender
            .send(&Message::Request(Request::new(id, method, params)))
            .await?;

        Ok(handle)
    }

    /// Send a request and wait for its result, applying the configured call
    /// timeout if any.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let handle = self.request(method, params).await?;
        match self.inner.config.call_timeout {
            Some(timeout) => handle.with_timeout(timeout).await,
            None => handle.await,
        }
    }

    /// Send a notification. The peer never replies.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        if let Some(cause) = self.close_cause() {
            return Err(RpcError::ConnectionClosed(cause));
        }
        tracing::debug!("Notify -> {}", method);
        self.inner
            .sender
            .send(&Message::Notification(Notification::new(method, params)))
            .await
    }

    /// Resolve the pending call matching `response.id`.
    ///
    /// A response without a pending call is logged and dropped.
    pub fn on_response(&self, response: Response) {
        let entry = self.inner.state.lock().pending.remove(&response.id);

        let call = match entry {
            Some(call) => call,
            None => {
                tracing::warn!("Discarding response for unknown request id {}", response.id);
                return;
            }
        };

        let outcome = match response.error {
            None => Ok(response.result),
            Some(error) => Err(RpcError::Remote {
                method: call.method,
                error,
            }),
        };

        // The caller may have stopped listening.
        let _ = call.tx.send(outcome);
    }

    /// Close the client: fail every pending call with
    /// `ConnectionClosed(cause)` and refuse new ones.
    ///
    /// Only the first call has an effect.
    pub fn shutdown(&self, cause: &str) {
        let drained: Vec<PendingCall> = {
            let mut state = self.inner.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(cause.to_string());
            state.pending.drain().map(|(_, call)| call).collect()
        };

        self.inner.sender.close(cause);

        tracing::debug!("RPC client closed ({}), failing {} pending calls", cause, drained.len());
        for call in drained {
            let _ = call.tx.send(Err(RpcError::ConnectionClosed(cause.to_string())));
        }
    }

    /// Number of calls awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed.is_some()
    }

    /// The shutdown cause, if closed.
    pub fn close_cause(&self) -> Option<String> {
        self.inner.state.lock().closed.clone()
    }

    /// The connection's sender.
    pub fn sender(&self) -> &MessageSender {
        &self.inner.sender
    }
}

/// The eventual result of one request.
///
/// Dropping the handle before it resolves evicts the pending call; a
/// response arriving later is treated as unmatched.
pub struct ResponseHandle {
    rx: oneshot::Receiver<Result<Value>>,
    id: u32,
    seq: u64,
    method: String,
    inner: Arc<Inner>,
    finished: bool,
}

impl ResponseHandle {
    /// Id assigned to the request.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Method of the request.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait at most `timeout`, then fail with [`RpcError::Timeout`] and
    /// evict the pending call.
    pub async fn with_timeout(self, timeout: Duration) -> Result<Value> {
        let method = self.method.clone();
        match tokio::time::timeout(timeout, self).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout { method, timeout }),
        }
    }
}

impl Future for ResponseHandle {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            Poll::Ready(Err(_)) => Err(RpcError::ConnectionClosed(
                "pending call dropped without a response".to_string(),
            )),
        };
        self.finished = true;
        Poll::Ready(outcome)
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.evict(self.id, self.seq);
        }
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish()
    }
}
