//! The single read loop of a connection.
//!
//! [`StreamDispatcher`] pulls frames off the [`MessageReader`] in arrival
//! order and routes them:
//!
//! - Response -> [`RpcClient::on_response`]
//! - Request -> [`HandlerProxy::request_received`] with a reply context
//! - Notification -> [`HandlerProxy::notification_received`]
//!
//! Frames that fail to decode are logged and skipped. When the stream ends
//! (EOF, I/O error, unrecoverable bytes) the loop shuts the client down,
//! closes the sender and signals the handler proxy, in that order, once.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;

use crate::connection::{MessageReader, MessageSender};
use crate::handler::{HandlerProxy, RequestContext};
use crate::protocol::Message;
use crate::rpc::RpcClient;

/// Cause reported when the peer closes the stream.
pub const EOF_CAUSE: &str = "stream closed by peer";

/// Reads and routes inbound frames.
pub struct StreamDispatcher<R> {
    reader: MessageReader<R>,
    rpc: RpcClient,
    handlers: Arc<HandlerProxy>,
    sender: MessageSender,
}

impl<R> StreamDispatcher<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Create a dispatcher over `reader`.
    pub fn new(
        reader: MessageReader<R>,
        rpc: RpcClient,
        handlers: Arc<HandlerProxy>,
        sender: MessageSender,
    ) -> Self {
        Self {
            reader,
            rpc,
            handlers,
            sender,
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> JoinHandle<String> {
        tokio::spawn(self.run())
    }

    /// Read until the stream ends, then tear down. Returns the close cause.
    pub async fn run(self) -> String {
        let StreamDispatcher {
            mut reader,
            rpc,
            handlers,
            sender,
        } = self;

        let cause = loop {
            match reader.next_message().await {
                Ok(Some(Ok(message))) => route(&rpc, &handlers, &sender, message).await,
                Ok(Some(Err(e))) => {
                    tracing::warn!("Dropping undecodable frame: {}", e);
                }
                Ok(None) => {
                    tracing::debug!("Stream closed by peer");
                    break EOF_CAUSE.to_string();
                }
                Err(e) => {
                    tracing::error!("Read loop error: {}", e);
                    break e.to_string();
                }
            }
        };

        rpc.shutdown(&cause);
        sender.close(&cause);
        handlers.source_closed(&cause);
        cause
    }
}

async fn route(rpc: &RpcClient, handlers: &HandlerProxy, sender: &MessageSender, message: Message) {
    match message {
        Message::Response(response) => {
            tracing::debug!("Routing response {}", response.id);
            rpc.on_response(response);
        }
        Message::Request(request) => {
            tracing::debug!("Routing request {} '{}'", request.id, request.method);
            let ctx = RequestContext::with_sender(request.id, request.method.clone(), sender.clone());
            handlers.request_received(request, ctx).await;
        }
        Message::Notification(notification) => {
            tracing::debug!("Routing notification '{}'", notification.method);
            handlers.notification_received(notification).await;
        }
    }
}
