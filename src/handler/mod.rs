//! Handler module - inbound notification and request delivery.
//!
//! Provides:
//! - [`HandlerProxy`] - ordered registries and fan-out dispatch
//! - [`RequestContext`] - lets request handlers reply to the peer
//! - [`Executor`] - where handler jobs run ([`ImmediateExecutor`], [`SpawnExecutor`])
//!
//! # Example
//!
//! ```ignore
//! use nvim_rpc::handler::{HandlerProxy, SpawnExecutor};
//!
//! let proxy = HandlerProxy::new(Arc::new(SpawnExecutor::default()));
//!
//! proxy.add_notification_handler(|n: Notification| async move {
//!     let (name,): (String,) = n.params_as()?;
//!     tracing::info!("buffer entered: {}", name);
//!     Ok(())
//! });
//!
//! proxy.add_request_handler(|req: Request, ctx: RequestContext| async move {
//!     ctx.respond(Value::from(req.params.len())).await
//! });
//! ```

mod context;
mod executor;
mod registry;

pub use context::RequestContext;
pub use executor::{Executor, ImmediateExecutor, Job, SpawnExecutor, DEFAULT_MAX_CONCURRENT_HANDLERS};
pub use registry::{
    BoxFuture, HandlerId, HandlerProxy, HandlerResult, NotificationHandler, RequestHandler,
};
