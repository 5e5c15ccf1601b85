//! # nvim-rpc
//!
//! Asynchronous msgpack-RPC client core for driving a Neovim process over a
//! socket or pipe.
//!
//! The crate sends calls and correlates their responses, and it delivers
//! notifications and reverse requests pushed by the editor to registered
//! handlers without stalling the read loop.
//!
//! ## Architecture
//!
//! - **Writer task**: one per connection, batches encoded frames
//! - **Stream dispatcher**: the single reader, routes each inbound frame
//! - **RPC client**: id allocation and response correlation
//! - **Handler proxy**: fan-out to handlers through a pluggable executor
//!
//! ## Example
//!
//! ```ignore
//! use nvim_rpc::{AtomicCallBuilder, Client};
//! use rmpv::Value;
//!
//! #[tokio::main]
//! async fn main() -> nvim_rpc::Result<()> {
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:6666").await?;
//!     let client = Client::builder().spawn_handlers(32).attach_io(stream);
//!
//!     client.call("nvim_command", vec![Value::from("echo 'hi'")]).await?;
//!
//!     let outcome = client
//!         .call_atomic(
//!             AtomicCallBuilder::new()
//!                 .add("nvim_get_current_line", vec![])
//!                 .add("nvim_get_mode", vec![]),
//!         )
//!         .await?;
//!     println!("{:?}", outcome.into_result()?);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod atomic;
pub mod codec;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod rpc;
pub mod writer;

mod client;

pub use atomic::{AtomicCallBuilder, AtomicFailure, AtomicOutcome};
pub use client::{Client, ClientBuilder, DROP_CAUSE};
pub use error::{Result, RpcError};
pub use handler::{HandlerId, HandlerProxy, RequestContext};
pub use protocol::{Message, Notification, Request, Response};
pub use rmpv::Value;
pub use rpc::{ResponseHandle, RpcClient};
