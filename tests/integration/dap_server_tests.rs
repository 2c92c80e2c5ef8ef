//! Integration tests for the front-end endpoints over TCP.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use runtime_dap::config::RuntimeConfig;
use runtime_dap::dap::{serve_listener, DapCodec};

use super::test_helpers::WAIT;

/// Bind an ephemeral listener and serve sessions on it.
async fn start_server() -> (u16, CancellationToken, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(serve_listener(
        listener,
        RuntimeConfig::default(),
        cancel.clone(),
    ));
    (port, cancel, server)
}

async fn connect(port: u16) -> Framed<TcpStream, DapCodec> {
    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("connect to adapter");
    Framed::new(stream, DapCodec::new())
}

async fn next_message(frames: &mut Framed<TcpStream, DapCodec>) -> Value {
    tokio::time::timeout(WAIT, frames.next())
        .await
        .expect("message in time")
        .expect("connection open")
        .expect("decode DAP message")
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Each TCP connection gets a session; cancellation stops the listener.
#[tokio::test]
async fn tcp_session_answers_initialize() {
    let (port, cancel, server) = start_server().await;
    let mut frames = connect(port).await;

    frames
        .send(json!({"seq": 1, "type": "request", "command": "initialize", "arguments": {}}))
        .await
        .expect("send initialize");
    let response = next_message(&mut frames).await;

    assert_eq!(response["type"], "response");
    assert_eq!(response["request_seq"], 1);
    assert_eq!(response["seq"], 1);
    assert_eq!(response["success"], true);
    assert_eq!(response["body"]["supportsTerminateRequest"], true);

    cancel.cancel();
    tokio::time::timeout(WAIT, server)
        .await
        .expect("listener stops")
        .expect("listener task joins");
}

/// Two connections are served independently.
#[tokio::test]
async fn concurrent_connections_have_separate_sessions() {
    let (port, cancel, _server) = start_server().await;
    let mut first = connect(port).await;
    let mut second = connect(port).await;

    for (frames, seq) in [(&mut first, 10), (&mut second, 20)] {
        frames
            .send(json!({"seq": seq, "type": "request", "command": "initialize"}))
            .await
            .expect("send initialize");
    }

    let a = next_message(&mut first).await;
    let b = next_message(&mut second).await;
    assert_eq!(a["request_seq"], 10);
    assert_eq!(b["request_seq"], 20);
    // Outgoing sequence numbers are per session.
    assert_eq!(a["seq"], 1);
    assert_eq!(b["seq"], 1);

    cancel.cancel();
}

// ── Message handling ──────────────────────────────────────────────────────────

/// Events and requests without a command are skipped, not answered.
#[tokio::test]
async fn non_requests_are_ignored() {
    let (port, cancel, _server) = start_server().await;
    let mut frames = connect(port).await;

    frames
        .send(json!({"seq": 1, "type": "event", "event": "custom"}))
        .await
        .expect("send event");
    frames
        .send(json!({"seq": 2, "type": "request"}))
        .await
        .expect("send request without command");
    frames
        .send(json!({"seq": 3, "type": "request", "command": "initialize"}))
        .await
        .expect("send initialize");

    let response = next_message(&mut frames).await;
    assert_eq!(response["request_seq"], 3);
    assert_eq!(response["command"], "initialize");

    cancel.cancel();
}

/// An unreadable body closes the connection.
#[tokio::test]
async fn malformed_body_closes_connection() {
    let (port, cancel, _server) = start_server().await;
    let mut frames = connect(port).await;

    frames
        .get_mut()
        .write_all(b"Content-Length: 5\r\n\r\n{nope")
        .await
        .expect("write malformed message");

    let end = tokio::time::timeout(WAIT, frames.next())
        .await
        .expect("connection closes in time");
    assert!(
        matches!(end, None | Some(Err(_))),
        "expected end of stream, got {end:?}"
    );

    cancel.cancel();
}

/// `disconnect` is answered and then the connection closes.
#[tokio::test]
async fn disconnect_closes_connection() {
    let (port, cancel, _server) = start_server().await;
    let mut frames = connect(port).await;

    frames
        .send(json!({"seq": 1, "type": "request", "command": "disconnect"}))
        .await
        .expect("send disconnect");

    let response = next_message(&mut frames).await;
    assert_eq!(response["command"], "disconnect");
    assert_eq!(response["success"], true);

    let end = tokio::time::timeout(WAIT, frames.next())
        .await
        .expect("connection closes in time");
    assert!(end.is_none(), "expected end of stream, got {end:?}");

    cancel.cancel();
}
