//! Integration tests for the debuggee transport over real TCP sockets.
//!
//! Covers the connect/poll state machine, request correlation on the wire,
//! locally synthesized connection events and malformed-frame recovery.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use runtime_dap::transport::{TransportClient, TransportState, NOT_CONNECTED};
use runtime_dap::wire::{encode_frame, FrameCodec, InboundFrame};
use runtime_dap::AppError;

use super::test_helpers::{acknowledge_all, FakeDebuggee, WAIT};

/// Forward every event named in `names` into a channel of `(name, body)`.
async fn record_events(
    client: &TransportClient,
    names: &[&str],
) -> mpsc::UnboundedReceiver<(String, Value)> {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in names {
        let tx = tx.clone();
        client
            .on(name, move |event| {
                let body = event.body().cloned().unwrap_or(Value::Null);
                let _ = tx.send((event.event.clone(), body));
            })
            .await
            .expect("register listener");
    }
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event arrives in time")
        .expect("listener alive")
}

/// A port nothing listens on.
async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}

// ── Connect ───────────────────────────────────────────────────────────────────

/// Connect completes once the debuggee announces itself.
#[tokio::test]
async fn connect_waits_for_connected_event() {
    let fake = FakeDebuggee::start(acknowledge_all).await;
    let client = TransportClient::new();
    let mut events = record_events(&client, &["connected"]).await;

    client
        .connect("127.0.0.1", fake.port, WAIT)
        .await
        .expect("connect");

    assert_eq!(client.state().await, TransportState::Connected);
    assert!(client.is_connected().await);
    assert_eq!(next_event(&mut events).await.0, "connected");
}

/// Connect polls until the debug port starts listening.
#[tokio::test]
async fn connect_retries_until_port_opens() {
    let port = dead_port().await;
    let client = TransportClient::new().with_poll_interval(Duration::from_millis(20));

    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("rebind port");
        let (stream, _) = listener.accept().await.expect("accept");
        let mut frames = Framed::new(stream, FrameCodec::new());
        frames
            .send(json!({"event": "connected"}))
            .await
            .expect("send connected");
        // Hold the socket open until the client is done.
        let _ = frames.next().await;
    });

    client
        .connect("127.0.0.1", port, WAIT)
        .await
        .expect("connect after retries");
    assert!(client.is_connected().await);

    client.disconnect().await;
    late.abort();
}

/// An unreachable port fails at the deadline with a `connectionError`.
#[tokio::test]
async fn connect_deadline_dispatches_connection_error() {
    let port = dead_port().await;
    let client = TransportClient::new().with_poll_interval(Duration::from_millis(50));
    let mut events = record_events(&client, &["connectionError"]).await;

    let err = client
        .connect("127.0.0.1", port, Duration::from_millis(300))
        .await
        .expect_err("nothing listening");

    let AppError::Connection(message) = err else {
        panic!("expected connection error, got {err:?}");
    };
    assert!(message.contains("within 300 ms"), "{message}");

    let (name, body) = next_event(&mut events).await;
    assert_eq!(name, "connectionError");
    assert_eq!(body["message"], message.as_str());
    assert_eq!(client.state().await, TransportState::Disconnected);
}

/// A port that accepts but never announces readiness also times out.
#[tokio::test]
async fn silent_debug_port_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let client = TransportClient::new().with_poll_interval(Duration::from_millis(50));
    let result = client
        .connect("127.0.0.1", port, Duration::from_millis(300))
        .await;

    assert!(matches!(result, Err(AppError::Connection(_))));
    assert_eq!(client.state().await, TransportState::Disconnected);
    holder.abort();
}

// ── Requests ──────────────────────────────────────────────────────────────────

/// Requests outside `Connected` fail without touching the wire.
#[tokio::test]
async fn send_requires_connection() {
    let client = TransportClient::new();
    let err = client
        .send("threads", None, None)
        .await
        .expect_err("not connected");
    assert_eq!(err, AppError::Request(NOT_CONNECTED.into()));
}

/// A request reaches the debuggee and its response comes back.
#[tokio::test]
async fn request_round_trip() {
    let mut fake = FakeDebuggee::start(|request, params| match request {
        "setBreakpoints" => Some(json!({"response": {"count": params.as_array().map_or(0, Vec::len)}})),
        "pause" => Some(json!({"error": {"message": "already paused"}})),
        _ => Some(json!({"response": true})),
    })
    .await;
    let client = TransportClient::new();
    client
        .connect("127.0.0.1", fake.port, WAIT)
        .await
        .expect("connect");

    let outcome = client
        .send(
            "setBreakpoints",
            Some(json!([{"file": "main.js", "line": 3}])),
            None,
        )
        .await
        .expect("setBreakpoints");
    assert_eq!(outcome.response, json!({"count": 1}));

    let received = fake.expect_request("setBreakpoints").await;
    assert_eq!(received["id"], outcome.id);
    assert_eq!(received["params"], json!([{"file": "main.js", "line": 3}]));

    let err = client
        .send("pause", None, None)
        .await
        .expect_err("debuggee rejects pause");
    assert_eq!(err, AppError::Request("already paused".into()));
}

/// Responses answered out of order still reach the right caller.
#[tokio::test]
async fn out_of_order_responses_are_correlated() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut frames = Framed::new(stream, FrameCodec::new());
        frames
            .send(json!({"event": "connected"}))
            .await
            .expect("send connected");

        let mut received = Vec::new();
        while received.len() < 2 {
            if let Some(Ok(InboundFrame::Message(request))) = frames.next().await {
                received.push(request);
            }
        }
        for request in received.iter().rev() {
            frames
                .send(json!({"id": request["id"], "response": request["request"]}))
                .await
                .expect("send response");
        }
        let _ = frames.next().await;
    });

    let client = TransportClient::new();
    client
        .connect("127.0.0.1", port, WAIT)
        .await
        .expect("connect");

    let (threads, scopes) = tokio::join!(
        client.send("threads", None, None),
        client.send("scopes", None, None),
    );
    assert_eq!(threads.expect("threads").response, json!("threads"));
    assert_eq!(scopes.expect("scopes").response, json!("scopes"));

    client.disconnect().await;
    server.abort();
}

/// Disconnecting fails requests still awaiting a response.
#[tokio::test]
async fn disconnect_fails_pending_requests() {
    let mut fake = FakeDebuggee::start(|request, _| {
        (request != "continue").then(|| json!({"response": true}))
    })
    .await;
    let client = TransportClient::new();
    client
        .connect("127.0.0.1", fake.port, WAIT)
        .await
        .expect("connect");

    let sender = client.clone();
    let pending = tokio::spawn(async move { sender.send("continue", None, None).await });
    fake.expect_request("continue").await;

    client.disconnect().await;
    let result = tokio::time::timeout(WAIT, pending)
        .await
        .expect("request settles")
        .expect("task joins");
    assert!(matches!(result, Err(AppError::Request(_))));
    assert_eq!(client.state().await, TransportState::Disconnected);
}

// ── Connection events ─────────────────────────────────────────────────────────

/// The debuggee closing the socket yields `connectionClosed`.
#[tokio::test]
async fn remote_close_dispatches_connection_closed() {
    let mut fake = FakeDebuggee::start(acknowledge_all).await;
    let client = TransportClient::new();
    let mut events = record_events(&client, &["connectionClosed"]).await;
    client
        .connect("127.0.0.1", fake.port, WAIT)
        .await
        .expect("connect");

    fake.hang_up().await;

    let (name, body) = next_event(&mut events).await;
    assert_eq!(name, "connectionClosed");
    assert_eq!(body, Value::Null);
    assert_eq!(client.state().await, TransportState::Disconnected);
    assert_eq!(
        client.send("threads", None, None).await.expect_err("closed"),
        AppError::Request(NOT_CONNECTED.into())
    );
}

/// A local disconnect stays silent.
#[tokio::test]
async fn local_disconnect_is_silent() {
    let fake = FakeDebuggee::start(acknowledge_all).await;
    let client = TransportClient::new();
    let mut events = record_events(&client, &["connectionClosed", "connectionError"]).await;
    client
        .connect("127.0.0.1", fake.port, WAIT)
        .await
        .expect("connect");

    client.disconnect().await;
    client.disconnect().await;

    let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(quiet.is_err(), "no connection event expected: {quiet:?}");
}

/// A malformed frame raises an `error` event and later frames still arrive.
#[tokio::test]
async fn malformed_frame_raises_error_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut bytes = encode_frame(&json!({"event": "connected"})).expect("encode");
        bytes.extend_from_slice(b"00000003\r\n{x}\r\n");
        bytes.extend_from_slice(
            &encode_frame(&json!({"event": "stopped", "body": {"reason": "breakpoint"}}))
                .expect("encode"),
        );
        stream.write_all(&bytes).await.expect("write frames");
        tokio::time::sleep(WAIT).await;
    });

    let client = TransportClient::new();
    let mut events = record_events(&client, &["error", "stopped"]).await;
    client
        .connect("127.0.0.1", port, WAIT)
        .await
        .expect("connect");

    let (name, body) = next_event(&mut events).await;
    assert_eq!(name, "error");
    let message = body["message"].as_str().expect("error message");
    assert!(message.starts_with("Invalid response from debuggee:"), "{message}");

    let (name, body) = next_event(&mut events).await;
    assert_eq!(name, "stopped");
    assert_eq!(body["reason"], "breakpoint");
    assert!(client.is_connected().await);

    server.abort();
}
