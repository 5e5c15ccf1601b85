//! Reply channel for reverse requests.
//!
//! The peer may call into the client (`rpcrequest` from a plugin). Request
//! handlers receive the [`Request`](crate::protocol::Request) and a
//! [`RequestContext`] bound to the connection:
//!
//! - `respond` sends `[1, id, nil, result]`
//! - `error` sends `[1, id, error, nil]`
//!
//! The peer expects exactly one reply per request. Clones of a context share
//! one "replied" flag; only the first reply is sent.
//!
//! # Example
//!
//! ```ignore
//! proxy.add_request_handler(|req: Request, ctx: RequestContext| async move {
//!     if req.method == "ping" {
//!         ctx.respond(Value::from("pong")).await?;
//!     }
//!     Ok(())
//! });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rmpv::Value;

use crate::codec::MsgPackCodec;
use crate::connection::MessageSender;
use crate::error::Result;
use crate::protocol::{Message, Response};

/// Context passed to request handlers.
///
/// `Clone` and safe to move into spawned tasks.
#[derive(Clone)]
pub struct RequestContext {
    /// Id of the request being answered.
    request_id: u32,
    /// Method of the request.
    method: String,
    /// Connection sender; `None` for detached contexts.
    sender: Option<MessageSender>,
    replied: Arc<AtomicBool>,
}

impl RequestContext {
    /// Create a detached context (for testing without a connection).
    pub fn new(request_id: u32, method: impl Into<String>) -> Self {
        Self {
            request_id,
            method: method.into(),
            sender: None,
            replied: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a context that replies through `sender`.
    pub fn with_sender(request_id: u32, method: impl Into<String>, sender: MessageSender) -> Self {
        Self {
            sender: Some(sender),
            ..Self::new(request_id, method)
        }
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Get the method name.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether a reply has already been sent through this context or a clone.
    pub fn has_replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }

    /// Reply with a result.
    pub async fn respond(&self, result: Value) -> Result<()> {
        self.send_response(Response::success(self.request_id, result))
            .await
    }

    /// Reply with a serializable result (structs are sent as maps).
    pub async fn respond_with<T: serde::Serialize>(&self, result: &T) -> Result<()> {
        let value = MsgPackCodec::to_value(result)?;
        self.respond(value).await
    }

    /// Reply with an error value.
    pub async fn error(&self, error: Value) -> Result<()> {
        self.send_response(Response::failure(self.request_id, error))
            .await
    }

    async fn send_response(&self, response: Response) -> Result<()> {
        if self.replied.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                "Request {} ('{}') already answered, dropping extra reply",
                self.request_id,
                self.method
            );
            return Ok(());
        }

        let sender = match &self.sender {
            Some(s) => s,
            None => {
                // No sender configured (testing mode)
                return Ok(());
            }
        };

        let result = sender.send(&Message::Response(response)).await;
        if result.is_err() {
            // Not delivered, a later reply may still go through
            self.replied.store(false, Ordering::Release);
        }
        result
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("replied", &self.has_replied())
            .finish()
    }
}
