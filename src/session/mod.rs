//! Debug session state machine.
//!
//! One [`DebugSession`] serves one front-end connection. It owns the
//! transport to the debuggee, the process supervisor and the source
//! translator, and reacts to three independent inputs from a single task:
//!
//! | Input            | Source                                   |
//! |------------------|------------------------------------------|
//! | front-end request| [`crate::dap`] reader                    |
//! | debuggee event   | transport listeners (wire + synthesized) |
//! | process event    | [`ProcessSupervisor`] output and exit    |
//!
//! `stopped` notifications are held back until the front end signals
//! `configurationDone`, then flushed once in arrival order.
//!
//! Requests that wait on the debuggee run in an in-flight task set, so the
//! loop keeps serving `disconnect` and `terminate` while a reply is pending.

mod handlers;
pub mod notification;
pub mod scope;
pub mod stop;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RuntimeConfig;
use crate::dap::{DapRequest, Frontend};
use crate::errors::error_message;
use crate::output::LINE_TERMINATOR;
use crate::sourcemap::SourceTranslator;
use crate::supervisor::{OutputStream, ProcessSupervisor, SupervisorEvent, TerminalHost};
use crate::transport::TransportClient;
use crate::wire::message::{
    EVENT_CONNECTED, EVENT_CONNECTION_CLOSED, EVENT_CONNECTION_ERROR, EVENT_DISCONNECTED,
    EVENT_ERROR, EVENT_STOPPED,
};
use crate::wire::Event;
use crate::{AppError, Result};

use handlers::Completion;
pub use notification::{Notification, OutputCategory};
pub use scope::{ScopeNode, ScopeTable, FIRST_SCOPE_ID, MAX_SCOPE_DEPTH};
pub use stop::{translate_stop, StopAction};

/// Debuggee events the session listens to.
const SESSION_EVENTS: [&str; 6] = [
    EVENT_CONNECTED,
    EVENT_DISCONNECTED,
    EVENT_STOPPED,
    EVENT_ERROR,
    EVENT_CONNECTION_CLOSED,
    EVENT_CONNECTION_ERROR,
];

/// Readiness facts that become true independently of each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    /// The debuggee's `connected` event was observed.
    pub connected: bool,
    /// The debuggee accepts configuration and execution requests.
    pub initialized: bool,
    /// The debuggee was started paused and has not been resumed yet.
    pub paused: bool,
    /// The front end sent `configurationDone`.
    pub frontend_ready: bool,
}

/// Whether the request loop keeps going after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// State of one debug session.
pub struct DebugSession {
    runtime: RuntimeConfig,
    frontend: Frontend,
    transport: TransportClient,
    supervisor: ProcessSupervisor,
    status: SessionStatus,
    /// Notifications held until the front end is ready.
    pending: Vec<Notification>,
    translator: SourceTranslator,
    /// Folder the front end's source paths are relative to.
    source_folder: Option<String>,
    program_folder: Option<String>,
    main_thread_id: i64,
    current_thread_id: i64,
    scopes: ScopeTable,
    /// Verified front-end breakpoints per normalized source path.
    breakpoints: HashMap<String, Vec<Value>>,
    lines_start_at1: bool,
    terminated_sent: bool,
    debuggee_tx: mpsc::UnboundedSender<Event>,
    debuggee_rx: Option<mpsc::UnboundedReceiver<Event>>,
    supervisor_rx: Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
    /// Requests waiting on the debuggee or the runtime.
    in_flight: JoinSet<Option<Completion>>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("status", &self.status)
            .field("source_folder", &self.source_folder)
            .field("current_thread_id", &self.current_thread_id)
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    /// Create a session answering through `frontend`.
    #[must_use]
    pub fn new(runtime: RuntimeConfig, frontend: Frontend, terminal: Arc<dyn TerminalHost>) -> Self {
        let transport = TransportClient::new().with_poll_interval(runtime.poll_interval());
        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();
        let supervisor = ProcessSupervisor::new(supervisor_tx, transport.clone(), terminal);
        let (debuggee_tx, debuggee_rx) = mpsc::unbounded_channel();

        Self {
            runtime,
            frontend,
            transport,
            supervisor,
            status: SessionStatus::default(),
            pending: Vec::new(),
            translator: SourceTranslator::disabled(),
            source_folder: None,
            program_folder: None,
            main_thread_id: 0,
            current_thread_id: 0,
            scopes: ScopeTable::new(),
            breakpoints: HashMap::new(),
            lines_start_at1: true,
            terminated_sent: false,
            debuggee_tx,
            debuggee_rx: Some(debuggee_rx),
            supervisor_rx: Some(supervisor_rx),
            in_flight: JoinSet::new(),
        }
    }

    /// Serve requests until `disconnect`, the end of `requests` or `cancel`.
    ///
    /// The debuggee is terminated and the transport closed on the way out.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the session was already run.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<DapRequest>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (Some(mut debuggee), Some(mut supervised)) =
            (self.debuggee_rx.take(), self.supervisor_rx.take())
        else {
            return Err(AppError::Config("debug session already running".into()));
        };

        for name in SESSION_EVENTS {
            let tx = self.debuggee_tx.clone();
            self.transport
                .on(name, move |event| {
                    let _ = tx.send(event.clone());
                })
                .await?;
        }

        let span = info_span!("session");
        async move {
            info!("session: started");
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!("session: cancelled");
                        break;
                    }
                    Some(event) = debuggee.recv() => self.on_debuggee_event(&event),
                    Some(event) = supervised.recv() => self.on_supervisor_event(event),
                    Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                        self.on_request_finished(joined);
                    }
                    request = requests.recv() => {
                        let Some(request) = request else {
                            info!("session: front end closed");
                            break;
                        };
                        if self.dispatch(request).await == Flow::Stop {
                            break;
                        }
                    }
                }
            }
            self.shutdown().await;
            info!("session: finished");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn shutdown(&mut self) {
        if self.supervisor.is_active().await {
            if let Err(err) = self.supervisor.terminate().await {
                warn!(%err, "session: runtime did not terminate cleanly");
            }
        }
        self.in_flight.shutdown().await;
        self.transport.disconnect().await;
    }

    fn on_request_finished(
        &mut self,
        joined: std::result::Result<Option<Completion>, JoinError>,
    ) {
        match joined {
            Ok(Some(completion)) => self.complete(completion),
            Ok(None) => {}
            Err(err) => warn!(%err, "session: request task failed"),
        }
    }

    // ── Notifications ─────────────────────────────────────────────────────────

    fn notify(&mut self, notification: Notification) {
        if notification == Notification::Terminated {
            if self.terminated_sent {
                return;
            }
            self.terminated_sent = true;
        }
        self.frontend.notify(&notification);
    }

    /// Send `notification` now, or hold it until the front end is ready.
    fn notify_when_ready(&mut self, notification: Notification) {
        if self.status.frontend_ready {
            self.notify(notification);
        } else {
            debug!(event = notification.event_name(), "session: holding notification");
            self.pending.push(notification);
        }
    }

    fn flush_pending(&mut self) {
        for notification in std::mem::take(&mut self.pending) {
            self.notify(notification);
        }
    }

    // ── Debuggee and process events ───────────────────────────────────────────

    fn on_debuggee_event(&mut self, event: &Event) {
        debug!(event = %event.event, "session: debuggee event");
        match event.event.as_str() {
            EVENT_CONNECTED => {
                self.status.connected = true;
                if !self.status.paused {
                    self.status.initialized = true;
                    self.notify(Notification::Initialized);
                    self.notify(Notification::Continued {
                        thread_id: self.current_thread_id,
                    });
                }
            }
            EVENT_STOPPED => self.on_stopped(event.body()),
            EVENT_ERROR => {
                let message = event
                    .body()
                    .map_or_else(|| "unknown error".to_owned(), error_message);
                warn!(%message, "session: debugger error");
                self.notify(Notification::Output {
                    category: OutputCategory::Important,
                    text: format!("Debugger error: {message}{LINE_TERMINATOR}"),
                });
            }
            EVENT_DISCONNECTED | EVENT_CONNECTION_CLOSED | EVENT_CONNECTION_ERROR => {
                self.status.connected = false;
                self.notify(Notification::Terminated);
            }
            other => debug!(event = other, "session: event ignored"),
        }
    }

    fn on_stopped(&mut self, body: Option<&Value>) {
        if let Some(thread_id) = body
            .and_then(|b| b.get("threadId"))
            .and_then(Value::as_i64)
            .filter(|&id| id != 0)
        {
            self.current_thread_id = thread_id;
        }

        let reason = body.and_then(|b| b.get("reason")).and_then(Value::as_str);
        match translate_stop(reason) {
            StopAction::Initialized => {
                self.status.initialized = true;
                self.notify(Notification::Initialized);
            }
            StopAction::Stopped(reason) => {
                info!(%reason, thread_id = self.current_thread_id, "session: debuggee stopped");
                self.notify_when_ready(Notification::Stopped {
                    reason,
                    thread_id: self.current_thread_id,
                });
            }
        }
    }

    fn on_supervisor_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Output { stream, text } => {
                let category = match stream {
                    OutputStream::Stdout => OutputCategory::Stdout,
                    OutputStream::Stderr => OutputCategory::Stderr,
                };
                self.notify(Notification::Output { category, text });
            }
            SupervisorEvent::Terminated => self.notify(Notification::Terminated),
        }
    }
}
