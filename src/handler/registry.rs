//! Handler registry and fan-out proxy.
//!
//! [`HandlerProxy`] keeps two independent, ordered registries: one for
//! notification handlers and one for request handlers. Each inbound frame is
//! delivered to every handler of its kind that is registered at the moment
//! of dispatch.
//!
//! Registries are copy-on-write: dispatch clones an `Arc` snapshot and
//! releases the lock before running anything, so handlers may add or remove
//! handlers (including themselves) while a fan-out is in progress.
//!
//! # Example
//!
//! ```ignore
//! let proxy = HandlerProxy::new(Arc::new(SpawnExecutor::default()));
//!
//! let id = proxy.add_notification_handler(|n: Notification| async move {
//!     tracing::info!("event {}", n.method);
//!     Ok(())
//! });
//!
//! proxy.remove_notification_handler(id);
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use rmpv::Value;
use tokio::sync::watch;

use super::{Executor, ImmediateExecutor, Job, RequestContext};
use crate::error::Result;
use crate::protocol::{Notification, Request};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Observer of inbound notifications.
///
/// Implemented for every `Fn(Notification) -> impl Future<Output = HandlerResult>`.
pub trait NotificationHandler: Send + Sync + 'static {
    /// Handle one notification.
    fn call(&self, notification: Notification) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> NotificationHandler for F
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, notification: Notification) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(notification))
    }
}

/// Observer of inbound requests.
///
/// Implemented for every
/// `Fn(Request, RequestContext) -> impl Future<Output = HandlerResult>`.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request. Reply through `ctx`.
    fn call(&self, request: Request, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Request, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(request, ctx))
    }
}

/// Registration token returned by the `add_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Entry<H: ?Sized> {
    id: HandlerId,
    handler: Arc<H>,
}

impl<H: ?Sized> Clone for Entry<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: self.handler.clone(),
        }
    }
}

type Registry<H> = RwLock<Arc<Vec<Entry<H>>>>;

fn add_entry<H: ?Sized>(registry: &Registry<H>, entry: Entry<H>) {
    let mut guard = registry.write();
    let mut next = Vec::with_capacity(guard.len() + 1);
    next.extend(guard.iter().cloned());
    next.push(entry);
    *guard = Arc::new(next);
}

fn remove_entry<H: ?Sized>(registry: &Registry<H>, id: HandlerId) -> bool {
    let mut guard = registry.write();
    if !guard.iter().any(|e| e.id == id) {
        return false;
    }
    let next: Vec<_> = guard.iter().filter(|e| e.id != id).cloned().collect();
    *guard = Arc::new(next);
    true
}

/// Fan-out dispatcher for inbound notifications and requests.
pub struct HandlerProxy {
    executor: Arc<dyn Executor>,
    notification_handlers: Registry<dyn NotificationHandler>,
    request_handlers: Registry<dyn RequestHandler>,
    next_id: AtomicU64,
    closed: AtomicBool,
    closed_tx: watch::Sender<Option<String>>,
}

impl HandlerProxy {
    /// Create a proxy submitting jobs to `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        let (closed_tx, _) = watch::channel(None);
        Self {
            executor,
            notification_handlers: RwLock::new(Arc::new(Vec::new())),
            request_handlers: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            closed_tx,
        }
    }

    fn next_handler_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a notification handler.
    pub fn add_notification_handler<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = self.next_handler_id();
        add_entry(
            &self.notification_handlers,
            Entry {
                id,
                handler: Arc::new(handler) as Arc<dyn NotificationHandler>,
            },
        );
        tracing::debug!("Registered notification handler {:?}", id);
        id
    }

    /// Register a request handler.
    pub fn add_request_handler<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(Request, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = self.next_handler_id();
        add_entry(
            &self.request_handlers,
            Entry {
                id,
                handler: Arc::new(handler) as Arc<dyn RequestHandler>,
            },
        );
        tracing::debug!("Registered request handler {:?}", id);
        id
    }

    /// Unregister a notification handler. Returns false if `id` was not registered.
    pub fn remove_notification_handler(&self, id: HandlerId) -> bool {
        let removed = remove_entry(&self.notification_handlers, id);
        if removed {
            tracing::debug!("Removed notification handler {:?}", id);
        }
        removed
    }

    /// Unregister a request handler. Returns false if `id` was not registered.
    pub fn remove_request_handler(&self, id: HandlerId) -> bool {
        let removed = remove_entry(&self.request_handlers, id);
        if removed {
            tracing::debug!("Removed request handler {:?}", id);
        }
        removed
    }

    /// Number of registered notification handlers.
    pub fn notification_handler_count(&self) -> usize {
        self.notification_handlers.read().len()
    }

    /// Number of registered request handlers.
    pub fn request_handler_count(&self) -> usize {
        self.request_handlers.read().len()
    }

    /// Deliver a notification to every registered notification handler.
    pub async fn notification_received(&self, notification: Notification) {
        let snapshot = self.notification_handlers.read().clone();
        tracing::debug!(
            "Passing notification '{}' to {} handlers",
            notification.method,
            snapshot.len()
        );

        for entry in snapshot.iter() {
            let handler = entry.handler.clone();
            let notification = notification.clone();
            let method = notification.method.clone();
            let job = contain("notification", method, async move {
                handler.call(notification).await
            });
            self.executor.submit(job).await;
        }
    }

    /// Deliver a request to every registered request handler.
    ///
    /// The peer blocks until it gets a reply. With no handler registered, or
    /// when every handler finished (returned, failed or panicked) without
    /// replying, the request is answered with an error.
    pub async fn request_received(&self, request: Request, ctx: RequestContext) {
        let snapshot = self.request_handlers.read().clone();
        tracing::debug!(
            "Passing request {} '{}' to {} handlers",
            request.id,
            request.method,
            snapshot.len()
        );

        if snapshot.is_empty() {
            tracing::warn!("No request handler for '{}', replying with error", request.method);
            let message = format!("no handler for request '{}'", request.method);
            reply_error(&ctx, message).await;
            return;
        }

        let unfinished = Arc::new(AtomicUsize::new(snapshot.len()));
        for entry in snapshot.iter() {
            let handler = entry.handler.clone();
            let request = request.clone();
            let handler_ctx = ctx.clone();
            let method = request.method.clone();
            let run = contain("request", method.clone(), async move {
                handler.call(request, handler_ctx).await
            });

            let ctx = ctx.clone();
            let unfinished = unfinished.clone();
            let job: Job = Box::pin(async move {
                run.await;
                if unfinished.fetch_sub(1, Ordering::AcqRel) == 1 && !ctx.has_replied() {
                    tracing::warn!(
                        "Request {} '{}' left unanswered, replying with error",
                        ctx.request_id(),
                        method
                    );
                    reply_error(&ctx, format!("request '{}' was not answered", method)).await;
                }
            });
            self.executor.submit(job).await;
        }
    }

    /// Signal that the inbound stream ended. Only the first call has an effect.
    pub fn source_closed(&self, cause: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Handler source closed: {}", cause);
        self.closed_tx.send_replace(Some(cause.to_string()));
    }

    /// Whether [`source_closed`](Self::source_closed) has been signalled.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the source closes and return the cause.
    pub async fn closed(&self) -> String {
        let mut rx = self.closed_tx.subscribe();
        let cause = match rx.wait_for(Option::is_some).await {
            Ok(cause) => cause.clone(),
            Err(_) => None,
        };
        cause.unwrap_or_default()
    }
}

impl Default for HandlerProxy {
    fn default() -> Self {
        Self::new(Arc::new(ImmediateExecutor))
    }
}

/// Send a `[type, message]` error reply, as the editor formats its own errors.
async fn reply_error(ctx: &RequestContext, message: String) {
    let error = Value::Array(vec![Value::from(0), Value::from(message)]);
    if let Err(e) = ctx.error(error).await {
        tracing::warn!("Failed to reply to request {}: {}", ctx.request_id(), e);
    }
}

/// Wrap a handler future so failures and panics stay inside the job.
fn contain<F>(kind: &'static str, method: String, fut: F) -> BoxFuture<'static, ()>
where
    F: Future<Output = HandlerResult> + Send + 'static,
{
    Box::pin(async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("{} handler for '{}' failed: {}", kind, method, e),
            Err(_) => tracing::error!("{} handler for '{}' panicked", kind, method),
        }
    })
}
