//! Integration tests for nvim-rpc.
//!
//! These tests drive a full `Client` against a scripted fake peer over an
//! in-memory duplex stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nvim_rpc::connection::MessageReader;
use nvim_rpc::protocol::DEFAULT_MAX_FRAME_SIZE;
use nvim_rpc::{
    AtomicCallBuilder, Client, ClientBuilder, Message, Notification, Request, RequestContext,
    Response, RpcError, Value,
};
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::watch;

/// The editor side of the stream.
struct Peer {
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    async fn send(&mut self, msg: impl Into<Message>) {
        let bytes = msg.into().encode().unwrap();
        self.writer.write_all(&bytes).await.unwrap();
    }

    async fn next(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.reader.next_message())
            .await
            .expect("peer timed out waiting for a frame")
            .unwrap()
            .expect("client closed the stream")
            .unwrap()
    }

    async fn expect_request(&mut self) -> Request {
        match self.next().await {
            Message::Request(req) => req,
            other => panic!("expected request, got {:?}", other),
        }
    }

    async fn expect_response(&mut self) -> Response {
        match self.next().await {
            Message::Response(resp) => resp,
            other => panic!("expected response, got {:?}", other),
        }
    }
}

fn connect(builder: ClientBuilder) -> (Client, Peer) {
    let (local, remote) = duplex(256 * 1024);
    let client = builder.attach_io(local);
    let (r, w) = tokio::io::split(remote);
    let peer = Peer {
        reader: MessageReader::new(r, DEFAULT_MAX_FRAME_SIZE),
        writer: w,
    };
    (client, peer)
}

/// Single call resolved by the peer's reply.
#[tokio::test]
async fn test_call_resolves_with_peer_result() {
    let (client, mut peer) = connect(Client::builder());

    let peer_side = async {
        let req = peer.expect_request().await;
        assert_eq!(req, Request::new(1, "get_x", vec![]));
        peer.send(Response::success(1, Value::from(42))).await;
    };

    let (result, ()) = tokio::join!(client.call("get_x", vec![]), peer_side);
    assert_eq!(result.unwrap(), Value::from(42));
    assert_eq!(client.rpc().pending_count(), 0);
}

/// Replies in reverse order still reach the right callers.
#[tokio::test]
async fn test_reordered_replies() {
    let (client, mut peer) = connect(Client::builder());

    let a = client.request("a", vec![]).await.unwrap();
    let b = client.request("b", vec![]).await.unwrap();

    let req_a = peer.expect_request().await;
    let req_b = peer.expect_request().await;
    assert_eq!((req_a.id, req_b.id), (1, 2));

    peer.send(Response::success(2, Value::from("result b"))).await;
    peer.send(Response::success(1, Value::from("result a"))).await;

    assert_eq!(a.await.unwrap(), Value::from("result a"));
    assert_eq!(b.await.unwrap(), Value::from("result b"));
}

/// Many concurrent callers each get exactly their own result.
#[tokio::test]
async fn test_concurrent_calls_resolve_exactly_once() {
    const N: u64 = 200;
    let (client, mut peer) = connect(Client::builder());
    let client = Arc::new(client);

    let echo = tokio::spawn(async move {
        let mut seen_ids = std::collections::HashSet::new();
        for _ in 0..N {
            let req = peer.expect_request().await;
            assert!(seen_ids.insert(req.id), "duplicate id {}", req.id);
            let value = req.params[0].clone();
            peer.send(Response::success(req.id, value)).await;
        }
        peer
    });

    let mut callers = Vec::new();
    for i in 0..N {
        let client = client.clone();
        callers.push(tokio::spawn(async move {
            client.call("echo", vec![Value::from(i)]).await
        }));
    }

    for (i, caller) in callers.into_iter().enumerate() {
        assert_eq!(caller.await.unwrap().unwrap(), Value::from(i as u64));
    }
    let _peer = echo.await.unwrap();
    assert_eq!(client.rpc().pending_count(), 0);
}

/// A response for an unknown id is ignored.
#[tokio::test]
async fn test_unmatched_response_is_ignored() {
    let (client, mut peer) = connect(Client::builder());

    let handle = client.request("a", vec![]).await.unwrap();
    let req = peer.expect_request().await;

    peer.send(Response::success(777, Value::from("stray"))).await;
    peer.send(Response::success(req.id, Value::from("real"))).await;

    assert_eq!(handle.await.unwrap(), Value::from("real"));
    assert!(!client.is_closed());
}

/// Peer error values are surfaced verbatim.
#[tokio::test]
async fn test_remote_error() {
    let (client, mut peer) = connect(Client::builder());

    let handle = client.request("nvim_buf_get_lines", vec![Value::from(99)]).await.unwrap();
    let req = peer.expect_request().await;
    let error = Value::Array(vec![Value::from(0), Value::from("Invalid buffer id: 99")]);
    peer.send(Response::failure(req.id, error.clone())).await;

    let err = handle.await.unwrap_err();
    assert_eq!(err.remote_value(), Some(&error));
}

/// Peer closing the stream fails pending calls and later ones.
#[tokio::test]
async fn test_peer_close_fails_pending_calls() {
    let (client, peer) = connect(Client::builder());

    let a = client.request("a", vec![]).await.unwrap();
    let b = client.request("b", vec![]).await.unwrap();
    drop(peer);

    for handle in [a, b] {
        assert!(handle.await.unwrap_err().is_connection_closed());
    }
    assert!(matches!(
        client.call("c", vec![]).await,
        Err(RpcError::ConnectionClosed(_))
    ));
}

/// Explicit shutdown fails every pending call with the given cause.
#[tokio::test]
async fn test_shutdown_with_cause() {
    let (client, _peer) = connect(Client::builder());

    let handles = vec![
        client.request("a", vec![]).await.unwrap(),
        client.request("b", vec![]).await.unwrap(),
        client.request("c", vec![]).await.unwrap(),
    ];

    client.shutdown("editor exiting");

    for handle in handles {
        match handle.await {
            Err(RpcError::ConnectionClosed(cause)) => assert_eq!(cause, "editor exiting"),
            other => panic!("expected ConnectionClosed, got {:?}", other),
        }
    }
    assert_eq!(client.rpc().pending_count(), 0);
}

/// Timed out calls are evicted; their late reply is discarded.
#[tokio::test]
async fn test_call_timeout_then_late_reply() {
    let (client, mut peer) = connect(Client::builder().call_timeout(Duration::from_millis(30)));

    let result = client.call("slow", vec![]).await;
    assert!(matches!(result, Err(RpcError::Timeout { .. })));
    assert_eq!(client.rpc().pending_count(), 0);

    let req = peer.expect_request().await;
    peer.send(Response::success(req.id, Value::Nil)).await;

    // Connection still healthy
    let next = client.request("fast", vec![]).await.unwrap();
    let req = peer.expect_request().await;
    peer.send(Response::success(req.id, Value::from(true))).await;
    assert_eq!(next.await.unwrap(), Value::Boolean(true));
}

/// Two handlers under a spawning executor both see the notification, and the
/// read loop moves on while they are still running.
#[tokio::test]
async fn test_notification_fan_out_does_not_block_reader() {
    let (client, mut peer) = connect(Client::builder().spawn_handlers(8));
    let (gate_tx, gate_rx) = watch::channel(false);
    let seen = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..2 {
        let gate = gate_rx.clone();
        let seen = seen.clone();
        client
            .handlers()
            .add_notification_handler(move |n: Notification| {
                let mut gate = gate.clone();
                let seen = seen.clone();
                async move {
                    let _ = gate.wait_for(|open| *open).await;
                    seen.lock().push(n.params);
                    Ok(())
                }
            });
    }

    let pending = client.request("after_event", vec![]).await.unwrap();
    let req = peer.expect_request().await;

    peer.send(Notification::new("event", vec![Value::from("x")])).await;
    peer.send(Response::success(req.id, Value::from("next frame"))).await;

    // Handlers are still parked on the gate, yet the response was routed
    assert_eq!(pending.await.unwrap(), Value::from("next frame"));
    assert!(seen.lock().is_empty());

    gate_tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(2), async {
        while seen.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        *seen.lock(),
        vec![vec![Value::from("x")], vec![Value::from("x")]]
    );
}

/// A failing handler does not stop delivery to the next one or the reader.
#[tokio::test]
async fn test_failing_handler_is_isolated() {
    let (client, mut peer) = connect(Client::builder());
    let delivered = Arc::new(AtomicUsize::new(0));

    client
        .handlers()
        .add_notification_handler(|_n: Notification| async {
            Err(RpcError::Handler("cannot decode".to_string()))
        });
    let d = delivered.clone();
    client
        .handlers()
        .add_notification_handler(move |_n: Notification| {
            let d = d.clone();
            async move {
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

    peer.send(Notification::new("one", vec![])).await;
    peer.send(Notification::new("two", vec![])).await;

    let handle = client.request("ping", vec![]).await.unwrap();
    let req = peer.expect_request().await;
    peer.send(Response::success(req.id, Value::Nil)).await;
    handle.await.unwrap();

    // Immediate executor: both notifications were handled before the response
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
}

/// Reverse request answered by a registered handler.
#[tokio::test]
async fn test_reverse_request_is_answered() {
    let (client, mut peer) = connect(Client::builder().spawn_handlers(4));

    client
        .handlers()
        .add_request_handler(|req: Request, ctx: RequestContext| async move {
            let (text,): (String,) = req.params_as()?;
            ctx.respond(Value::from(text.to_uppercase())).await
        });

    peer.send(Request::new(5, "upper", vec![Value::from("abc")])).await;

    let resp = peer.expect_response().await;
    assert_eq!(resp, Response::success(5, Value::from("ABC")));
}

/// A reverse request with no handler gets an error instead of hanging.
#[tokio::test]
async fn test_unhandled_reverse_request_gets_error() {
    let (_client, mut peer) = connect(Client::builder());

    peer.send(Request::new(9, "unknown_method", vec![])).await;

    let resp = peer.expect_response().await;
    assert_eq!(resp.id, 9);
    assert!(resp.is_error());
    let error = resp.error.unwrap();
    let error = error.as_array().unwrap();
    assert_eq!(error[0], Value::from(0));
    assert!(error[1].as_str().unwrap().contains("unknown_method"));
}

/// A reverse request whose only handler fails still gets a reply.
#[tokio::test]
async fn test_failing_request_handler_gets_error_reply() {
    let (client, mut peer) = connect(Client::builder().spawn_handlers(4));

    client
        .handlers()
        .add_request_handler(|_req: Request, _ctx: RequestContext| async {
            Err(RpcError::Handler("cannot serve".to_string()))
        });

    peer.send(Request::new(3, "rev", vec![])).await;

    let resp = peer.expect_response().await;
    assert_eq!(resp.id, 3);
    assert!(resp.is_error());
    assert_eq!(resp.result, Value::Nil);
}

/// Dropping the client fails calls made through a surviving RpcClient clone.
#[tokio::test]
async fn test_dropped_client_closes_rpc_clones() {
    let (client, _peer) = connect(Client::builder());
    let rpc = client.rpc().clone();

    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(1), rpc.call("x", vec![]))
        .await
        .unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionClosed(_))));
    assert!(rpc.is_closed());
}

/// Atomic batch where the second of three calls fails.
#[tokio::test]
async fn test_atomic_partial_failure() {
    let (client, mut peer) = connect(Client::builder());

    let batch = AtomicCallBuilder::new()
        .add("nvim_get_current_line", vec![])
        .add("nvim_buf_get_name", vec![Value::from(99)])
        .add("nvim_get_mode", vec![]);

    let peer_side = async {
        let req = peer.expect_request().await;
        assert_eq!(req.method, "nvim_call_atomic");
        assert_eq!(req.params.len(), 1);
        let calls = req.params[0].as_array().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].as_array().unwrap()[0].as_str(), Some("nvim_buf_get_name"));

        let reply = Value::Array(vec![
            Value::Array(vec![Value::from("first line")]),
            Value::Array(vec![
                Value::from(1),
                Value::from(0),
                Value::from("Invalid buffer id: 99"),
            ]),
        ]);
        peer.send(Response::success(req.id, reply)).await;
    };

    let (outcome, ()) = tokio::join!(client.call_atomic(batch), peer_side);
    let outcome = outcome.unwrap();

    assert_eq!(outcome.results, vec![Value::from("first line")]);
    assert_eq!(outcome.error_index(), Some(1));
    assert_eq!(
        outcome.error(),
        Some(&Value::Array(vec![
            Value::from(0),
            Value::from("Invalid buffer id: 99")
        ]))
    );

    match outcome.into_result() {
        Err(RpcError::PartialBatchFailure { index, results, .. }) => {
            assert_eq!(index, 1);
            assert_eq!(results.len(), 1);
        }
        other => panic!("expected PartialBatchFailure, got {:?}", other),
    }
}

/// Atomic batch where every call succeeds.
#[tokio::test]
async fn test_atomic_all_succeed() {
    let (client, mut peer) = connect(Client::builder());

    let batch = AtomicCallBuilder::new()
        .add("a", vec![])
        .add("b", vec![])
        .add("c", vec![]);

    let peer_side = async {
        let req = peer.expect_request().await;
        let reply = Value::Array(vec![
            Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)]),
            Value::Nil,
        ]);
        peer.send(Response::success(req.id, reply)).await;
    };

    let (outcome, ()) = tokio::join!(client.call_atomic(batch), peer_side);
    let outcome = outcome.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.error_index(), None);
    assert_eq!(
        outcome.results,
        vec![Value::from(1), Value::from(2), Value::from(3)]
    );
}

/// Notifications sent by the client reach the peer and need no reply.
#[tokio::test]
async fn test_notify_reaches_peer() {
    let (client, mut peer) = connect(Client::builder());

    client
        .notify("nvim_subscribe", vec![Value::from("BufEnter")])
        .await
        .unwrap();

    match peer.next().await {
        Message::Notification(n) => {
            assert_eq!(n.method, "nvim_subscribe");
            assert_eq!(n.params, vec![Value::from("BufEnter")]);
        }
        other => panic!("expected notification, got {:?}", other),
    }
    assert_eq!(client.rpc().pending_count(), 0);
}
