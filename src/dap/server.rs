//! Front-end endpoints: one debug session per stdio pair or TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::codec::DapCodec;
use super::protocol::{DapRequest, Frontend, Outgoing};
use crate::config::RuntimeConfig;
use crate::session::DebugSession;
use crate::supervisor::{ConsoleTerminal, TerminalHost};
use crate::Result;

/// Requests buffered between the reader and the session.
const REQUEST_QUEUE_DEPTH: usize = 32;

/// Run one debug session over `reader`/`writer` until it ends.
///
/// # Errors
///
/// Returns an error if the session cannot start.
pub async fn serve_stream<R, W>(
    reader: R,
    writer: W,
    runtime: RuntimeConfig,
    terminal: Arc<dyn TerminalHost>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (frontend, outgoing) = Frontend::channel();
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);

    let writer_task = tokio::spawn(write_messages(writer, outgoing));
    let reader_task = tokio::spawn(read_requests(reader, request_tx));

    let session = DebugSession::new(runtime, frontend, terminal);
    let result = session.run(request_rx, cancel).await;

    reader_task.abort();
    // The writer ends once every frontend handle is gone.
    if let Err(err) = writer_task.await {
        warn!(%err, "dap: writer task failed");
    }
    result
}

/// Serve a single session on the process's stdin/stdout.
///
/// # Errors
///
/// Returns an error if the session cannot start.
pub async fn serve_stdio(runtime: RuntimeConfig, cancel: CancellationToken) -> Result<()> {
    info!("dap: serving on stdio");
    serve_stream(
        tokio::io::stdin(),
        tokio::io::stdout(),
        runtime,
        Arc::new(ConsoleTerminal::new()),
        cancel,
    )
    .await
}

/// Accept front ends on `addr`, one session per connection, until `cancel`.
///
/// # Errors
///
/// Returns [`crate::AppError::Io`] if the listener cannot be bound.
pub async fn serve_tcp(
    addr: SocketAddr,
    runtime: RuntimeConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "dap: listening");
    serve_listener(listener, runtime, cancel).await;
    Ok(())
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    runtime: RuntimeConfig,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("dap: listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let runtime = runtime.clone();
                        let cancel = cancel.child_token();
                        let span = info_span!("dap_conn", %peer);
                        tokio::spawn(
                            async move {
                                info!("dap: front end connected");
                                let (read_half, write_half) = stream.into_split();
                                let terminal: Arc<dyn TerminalHost> =
                                    Arc::new(ConsoleTerminal::new());
                                if let Err(err) =
                                    serve_stream(read_half, write_half, runtime, terminal, cancel)
                                        .await
                                {
                                    error!(%err, "dap: session failed");
                                }
                                info!("dap: front end disconnected");
                            }
                            .instrument(span),
                        );
                    }
                    Err(err) => warn!(%err, "dap: accept failed"),
                }
            }
        }
    }
}

async fn read_requests<R>(reader: R, requests: mpsc::Sender<DapRequest>)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, DapCodec::new());
    while let Some(frame) = frames.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dap: unreadable message; closing");
                break;
            }
        };

        let request = match serde_json::from_value::<DapRequest>(message) {
            Ok(request) if request.kind == "request" => request,
            Ok(other) => {
                debug!(kind = %other.kind, "dap: ignoring non-request message");
                continue;
            }
            Err(err) => {
                warn!(%err, "dap: malformed request ignored");
                continue;
            }
        };

        if requests.send(request).await.is_err() {
            break;
        }
    }
    debug!("dap: request stream ended");
}

async fn write_messages<W>(writer: W, mut outgoing: mpsc::UnboundedReceiver<Outgoing>)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, DapCodec::new());
    let mut seq: i64 = 0;
    while let Some(message) = outgoing.recv().await {
        seq += 1;
        if let Err(err) = sink.send(message.to_json(seq)).await {
            warn!(%err, "dap: write failed");
            break;
        }
    }
}
