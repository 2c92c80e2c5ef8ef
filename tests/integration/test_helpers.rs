//! Shared helpers for integration tests.
//!
//! [`FakeDebuggee`] stands in for the runtime's debug port: it accepts one
//! connection, announces itself with a `connected` event and answers
//! requests through a caller-supplied reply function returning the response
//! envelope without its id (`{"response": ...}` or `{"error": ...}`).
//! [`DapClient`] plays the front end over an in-memory duplex stream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use runtime_dap::config::RuntimeConfig;
use runtime_dap::dap::{serve_stream, DapCodec};
use runtime_dap::supervisor::{ConsoleTerminal, TerminalHost};
use runtime_dap::wire::{FrameCodec, InboundFrame};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Reply function: request name and params to an optional envelope.
pub type Reply = Box<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

// ── Fake debuggee ─────────────────────────────────────────────────────────────

/// Scripted debug port on an ephemeral localhost port.
pub struct FakeDebuggee {
    /// Port the fake listens on.
    pub port: u16,
    /// Every request received, as raw payloads.
    pub requests: mpsc::UnboundedReceiver<Value>,
    push: Option<mpsc::UnboundedSender<Value>>,
    task: JoinHandle<()>,
}

impl FakeDebuggee {
    /// Start a fake that answers through `reply` (unanswered when `None`).
    pub async fn start(
        reply: impl Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake debuggee");
        let port = listener.local_addr().expect("local addr").port();
        let (request_tx, requests) = mpsc::unbounded_channel();
        let (push, push_rx) = mpsc::unbounded_channel();
        let reply: Reply = Box::new(reply);

        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept adapter");
            let mut frames = Framed::new(stream, FrameCodec::new());
            frames
                .send(json!({"event": "connected"}))
                .await
                .expect("send connected");
            serve_requests(frames, reply, request_tx, push_rx).await;
        });

        Self {
            port,
            requests,
            push: Some(push),
            task,
        }
    }

    /// Send a raw payload (typically an event) to the adapter.
    pub fn push(&self, payload: Value) {
        if let Some(push) = &self.push {
            push.send(payload).expect("fake debuggee running");
        }
    }

    /// Close the connection from the debuggee side.
    pub async fn hang_up(&mut self) {
        self.push = None;
        let _ = tokio::time::timeout(WAIT, &mut self.task).await;
    }

    /// Wait for the next request named `name`, skipping others.
    pub async fn expect_request(&mut self, name: &str) -> Value {
        tokio::time::timeout(WAIT, async {
            loop {
                let request = self.requests.recv().await.expect("fake debuggee running");
                if request["request"] == name {
                    return request;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {name} request within {WAIT:?}"))
    }
}

impl Drop for FakeDebuggee {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_requests(
    mut frames: Framed<tokio::net::TcpStream, FrameCodec>,
    reply: Reply,
    requests: mpsc::UnboundedSender<Value>,
    mut push: mpsc::UnboundedReceiver<Value>,
) {
    loop {
        tokio::select! {
            pushed = push.recv() => match pushed {
                Some(payload) => {
                    if frames.send(payload).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = frames.next() => match frame {
                Some(Ok(InboundFrame::Message(request))) => {
                    let id = request["id"].clone();
                    let name = request["request"].as_str().unwrap_or_default().to_owned();
                    let answer = reply(&name, &request["params"]);
                    let _ = requests.send(request);
                    if let Some(mut envelope) = answer {
                        envelope["id"] = id;
                        let _ = frames.send(envelope).await;
                    }
                }
                Some(Ok(InboundFrame::Malformed(_))) => {}
                Some(Err(_)) | None => break,
            },
        }
    }
}

/// Reply function answering every request with `true`.
pub fn acknowledge_all(_request: &str, _params: &Value) -> Option<Value> {
    Some(json!({"response": true}))
}

// ── Front-end client ──────────────────────────────────────────────────────────

/// In-memory front end driving one debug session.
pub struct DapClient {
    frames: Framed<DuplexStream, DapCodec>,
    seq: i64,
    /// Messages read while waiting for something else.
    backlog: Vec<Value>,
    /// Cancels the session.
    pub cancel: CancellationToken,
    /// The session task.
    pub session: JoinHandle<runtime_dap::Result<()>>,
}

impl DapClient {
    /// Start a session over a duplex stream with default runtime settings.
    pub fn start() -> Self {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let (read_half, write_half) = tokio::io::split(server_io);
        let cancel = CancellationToken::new();
        let terminal: Arc<dyn TerminalHost> = Arc::new(ConsoleTerminal::new());
        let session = tokio::spawn(serve_stream(
            read_half,
            write_half,
            RuntimeConfig::default(),
            terminal,
            cancel.clone(),
        ));

        Self {
            frames: Framed::new(client_io, DapCodec::new()),
            seq: 0,
            backlog: Vec::new(),
            cancel,
            session,
        }
    }

    /// Send a request and return its sequence number.
    pub async fn send(&mut self, command: &str, arguments: Value) -> i64 {
        self.seq += 1;
        self.frames
            .send(json!({
                "seq": self.seq,
                "type": "request",
                "command": command,
                "arguments": arguments,
            }))
            .await
            .expect("send request");
        self.seq
    }

    /// Send a request and wait for its response.
    pub async fn request(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.send(command, arguments).await;
        self.response(seq).await
    }

    /// Wait for the response to request `seq`.
    pub async fn response(&mut self, seq: i64) -> Value {
        self.wait_for(|m| m["type"] == "response" && m["request_seq"] == seq)
            .await
    }

    /// Wait for the next event named `name`.
    pub async fn event(&mut self, name: &str) -> Value {
        self.wait_for(|m| m["type"] == "event" && m["event"] == name)
            .await
    }

    /// Drain everything already received or arriving within `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<Value> {
        let mut seen = std::mem::take(&mut self.backlog);
        while let Ok(Some(frame)) = tokio::time::timeout(window, self.frames.next()).await {
            seen.push(frame.expect("decode DAP message"));
        }
        seen
    }

    async fn wait_for(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        if let Some(index) = self.backlog.iter().position(&matches) {
            return self.backlog.remove(index);
        }

        tokio::time::timeout(WAIT, async {
            loop {
                let message = self
                    .frames
                    .next()
                    .await
                    .expect("session still writing")
                    .expect("decode DAP message");
                if matches(&message) {
                    return message;
                }
                self.backlog.push(message);
            }
        })
        .await
        .expect("message arrives in time")
    }
}
