//! Framed transport client for the debuggee's debug port.
//!
//! One [`TransportClient`] owns at most one TCP connection at a time. A
//! connection is split into two tasks, mirroring the usual reader/writer
//! arrangement:
//!
//! - the **reader** drives a [`FramedRead`] over the socket's read half,
//!   classifies every decoded payload and routes it to the [`Correlator`];
//! - the **writer** drains an [`mpsc`] queue of outbound [`Request`]s into a
//!   [`FramedWrite`] so frames hit the wire in send order.
//!
//! # States
//!
//! ```text
//! Disconnected → Connecting → Initializing → Connected → Disconnected
//! ```
//!
//! While `Initializing` the debug port may not be listening yet: failed
//! connect attempts and connections that drop before the debuggee's
//! `connected` event are retried every poll interval until the deadline.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::error_message;
use crate::transport::correlator::{Correlator, RequestOutcome};
use crate::wire::codec::{FrameCodec, InboundFrame};
use crate::wire::message::{
    Event, Inbound, Request, EVENT_CONNECTED, EVENT_CONNECTION_CLOSED, EVENT_CONNECTION_ERROR,
    EVENT_ERROR,
};
use crate::{AppError, Result};

/// Delay between connect attempts while the debug port is not ready.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Error message returned by [`TransportClient::send`] outside `Connected`.
pub const NOT_CONNECTED: &str = "Not connected to debuggee";

/// Outbound requests buffered ahead of the writer task.
const WRITE_QUEUE_DEPTH: usize = 64;

/// Connection state of a [`TransportClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No socket.
    Disconnected,
    /// A connect sequence has started.
    Connecting,
    /// Polling the debug port and waiting for the `connected` event.
    Initializing,
    /// The debuggee announced itself; requests may be sent.
    Connected,
}

/// Mutable connection bookkeeping shared by the client and its tasks.
#[derive(Debug)]
struct Link {
    state: TransportState,
    /// Bumped on every connect so tasks of a replaced connection are ignored.
    generation: u64,
    writer: Option<mpsc::Sender<Request>>,
    cancel: Option<CancellationToken>,
}

/// Outcome of attaching reader/writer tasks to one accepted socket.
enum Attach {
    Connected,
    Closed,
    TimedOut,
}

/// Client for the debuggee's framed JSON debug protocol.
///
/// Cheap to clone; clones share the same connection and [`Correlator`].
#[derive(Debug, Clone)]
pub struct TransportClient {
    link: Arc<Mutex<Link>>,
    correlator: Arc<Correlator>,
    poll_interval: Duration,
}

impl Default for TransportClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClient {
    /// Create a disconnected client with its own correlator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            link: Arc::new(Mutex::new(Link {
                state: TransportState::Disconnected,
                generation: 0,
                writer: None,
                cancel: None,
            })),
            correlator: Arc::new(Correlator::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the delay between connect attempts.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Correlator shared with the reader task.
    #[must_use]
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Current connection state.
    pub async fn state(&self) -> TransportState {
        self.link.lock().await.state
    }

    /// Whether requests may currently be sent.
    pub async fn is_connected(&self) -> bool {
        self.state().await == TransportState::Connected
    }

    /// Register an event listener; see [`Correlator::on`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if `event` is empty.
    pub async fn on(
        &self,
        event: &str,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<()> {
        self.correlator.on(event, listener).await
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    /// Connect to `host:port` and wait for the debuggee's `connected` event.
    ///
    /// Tears down any existing connection first. Connection refusals and
    /// early closes are retried every poll interval until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] when the deadline passes without the
    /// `connected` event, after dispatching a `connectionError` event, or
    /// when the attempt is cancelled by [`TransportClient::disconnect`].
    pub async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        self.disconnect().await;

        let cancel = CancellationToken::new();
        let generation = {
            let mut link = self.link.lock().await;
            link.generation += 1;
            link.state = TransportState::Connecting;
            link.cancel = Some(cancel.clone());
            link.generation
        };
        let deadline = Instant::now() + timeout;
        info!(host, port, timeout_ms = timeout.as_millis(), "transport: connecting");

        self.set_state(generation, TransportState::Initializing).await;

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Connection("connection attempt cancelled".into()));
            }

            match timeout_at(deadline, TcpStream::connect((host, port))).await {
                Err(_elapsed) => break,
                Ok(Err(err)) => debug!(host, port, %err, "transport: debug port not ready"),
                Ok(Ok(stream)) => match self.attach(stream, generation, &cancel, deadline).await {
                    Attach::Connected => {
                        info!(host, port, "transport: connected");
                        return Ok(());
                    }
                    Attach::Closed => debug!(host, port, "transport: closed during initialization"),
                    Attach::TimedOut => break,
                },
            }

            let next = (Instant::now() + self.poll_interval).min(deadline);
            tokio::select! {
                () = cancel.cancelled() => {}
                () = sleep_until(next) => {}
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        if cancel.is_cancelled() {
            return Err(AppError::Connection("connection attempt cancelled".into()));
        }

        self.disconnect().await;
        let message = format!(
            "Could not connect to {host}:{port} debug port within {} ms",
            timeout.as_millis()
        );
        warn!(host, port, "transport: connect deadline expired");
        self.correlator
            .dispatch(&Event::local(
                EVENT_CONNECTION_ERROR,
                Some(json!({ "message": message })),
            ))
            .await;
        Err(AppError::Connection(message))
    }

    /// Close the connection, cancel its tasks and fail in-flight requests.
    ///
    /// Idempotent; safe in any state, including mid-connect.
    pub async fn disconnect(&self) {
        let (cancel, previous) = {
            let mut link = self.link.lock().await;
            let previous = link.state;
            link.state = TransportState::Disconnected;
            link.writer = None;
            (link.cancel.take(), previous)
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if previous != TransportState::Disconnected {
            info!(?previous, "transport: disconnected");
        }

        self.correlator
            .fail_all("connection closed before a response arrived")
            .await;
    }

    /// Send `request` and wait for the matching response.
    ///
    /// # Errors
    ///
    /// - [`AppError::Request`]`("Not connected to debuggee")` outside
    ///   `Connected`.
    /// - [`AppError::Request`] carrying the debuggee's error message when the
    ///   response has an `error` field.
    /// - [`AppError::Request`] when the connection closes first.
    pub async fn send(
        &self,
        request: &str,
        params: Option<Value>,
        data: Option<Value>,
    ) -> Result<RequestOutcome> {
        let writer = {
            let link = self.link.lock().await;
            match (link.state, &link.writer) {
                (TransportState::Connected, Some(writer)) => writer.clone(),
                _ => return Err(AppError::Request(NOT_CONNECTED.into())),
            }
        };

        let (id, reply) = self.correlator.register(request, data).await;
        debug!(id, request, "transport: sending request");

        let frame = Request {
            id,
            request: request.to_owned(),
            params,
        };
        if writer.send(frame).await.is_err() {
            self.correlator.abandon(id).await;
            return Err(AppError::Request(format!("{request}: connection closed")));
        }

        let outcome = reply.await.map_err(|_| {
            AppError::Request(format!("{request}: connection closed before a response arrived"))
        })?;

        if outcome.success {
            Ok(outcome)
        } else {
            Err(AppError::Request(error_message(&outcome.response)))
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn set_state(&self, generation: u64, state: TransportState) {
        let mut link = self.link.lock().await;
        if link.generation == generation && link.state != TransportState::Disconnected {
            link.state = state;
        }
    }

    /// Spawn reader and writer for `stream`, then wait for `connected`.
    async fn attach(
        &self,
        stream: TcpStream,
        generation: u64,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Attach {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "transport: could not disable nagle");
        }
        let (read_half, write_half) = stream.into_split();
        let attempt = cancel.child_token();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);

        self.link.lock().await.writer = Some(writer_tx);

        tokio::spawn(run_reader(
            self.clone(),
            read_half,
            generation,
            ready_tx,
            attempt.clone(),
        ));
        tokio::spawn(run_writer(
            self.clone(),
            write_half,
            writer_rx,
            generation,
            attempt.clone(),
        ));

        match timeout_at(deadline, ready_rx).await {
            Ok(Ok(())) => Attach::Connected,
            Ok(Err(_)) => {
                attempt.cancel();
                Attach::Closed
            }
            Err(_) => {
                attempt.cancel();
                Attach::TimedOut
            }
        }
    }

    async fn mark_connected(&self, generation: u64) {
        self.set_state(generation, TransportState::Connected).await;
    }

    /// React to the socket closing or failing.
    ///
    /// Before `Connected` this is silent: the connect loop retries. After
    /// `Connected` the client disconnects and dispatches `connectionError`
    /// (when `failure` is set) or `connectionClosed`.
    async fn connection_lost(&self, generation: u64, failure: Option<String>) {
        let was_connected = {
            let link = self.link.lock().await;
            if link.generation != generation {
                return;
            }
            link.state == TransportState::Connected
        };

        if !was_connected {
            debug!(?failure, "transport: socket dropped before connected event");
            return;
        }

        self.disconnect().await;

        let event = match failure {
            Some(message) => {
                warn!(%message, "transport: connection error");
                Event::local(EVENT_CONNECTION_ERROR, Some(json!({ "message": message })))
            }
            None => {
                info!("transport: connection closed by debuggee");
                Event::local(EVENT_CONNECTION_CLOSED, None)
            }
        };
        self.correlator.dispatch(&event).await;
    }
}

// ── Connection tasks ──────────────────────────────────────────────────────────

/// Reader task: decode frames and route them until EOF, error or cancel.
///
/// Malformed frames dispatch an `error` event and are otherwise skipped.
/// Exits without reporting when `cancel` fires.
async fn run_reader(
    client: TransportClient,
    read_half: OwnedReadHalf,
    generation: u64,
    ready: oneshot::Sender<()>,
    cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(read_half, FrameCodec::new());
    let mut ready = Some(ready);

    let failure = loop {
        let frame = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "transport reader: cancelled");
                return;
            }

            frame = frames.next() => frame,
        };

        match frame {
            None => break None,
            Some(Err(err)) => break Some(err.message().to_owned()),
            Some(Ok(InboundFrame::Malformed(reason))) => {
                warn!(%reason, "transport reader: malformed frame skipped");
                let event = Event::local(
                    EVENT_ERROR,
                    Some(json!({ "message": format!("Invalid response from debuggee: {reason}") })),
                );
                client.correlator.dispatch(&event).await;
            }
            Some(Ok(InboundFrame::Message(payload))) => match Inbound::classify(payload) {
                Inbound::Event(event) => {
                    debug!(event = %event.event, "transport reader: event received");
                    if event.event == EVENT_CONNECTED {
                        client.mark_connected(generation).await;
                        if let Some(tx) = ready.take() {
                            // The connect loop may have given up already.
                            let _ = tx.send(());
                        }
                    }
                    client.correlator.dispatch(&event).await;
                }
                Inbound::Response(response) => {
                    debug!(id = response.id, "transport reader: response received");
                    client.correlator.resolve(response).await;
                }
            },
        }
    };

    cancel.cancel();
    client.connection_lost(generation, failure).await;
}

/// Writer task: frame queued requests onto the socket in order.
async fn run_writer(
    client: TransportClient,
    write_half: OwnedWriteHalf,
    mut requests: mpsc::Receiver<Request>,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut sink = FramedWrite::new(write_half, FrameCodec::new());

    loop {
        let request = tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let (id, name) = (request.id, request.request.clone());
        if let Err(err) = sink.send(request).await {
            warn!(id, request = %name, %err, "transport writer: write failed");
            cancel.cancel();
            client
                .connection_lost(generation, Some(err.message().to_owned()))
                .await;
            break;
        }
        debug!(id, request = %name, "transport writer: frame written");
    }
}
