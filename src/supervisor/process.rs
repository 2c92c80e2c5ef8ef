//! Runtime process supervision.
//!
//! [`ProcessSupervisor`] launches the runtime either as a child process with
//! captured output or inside a [`TerminalHost`], and terminates it with a
//! graceful step followed by a hard kill once the grace period elapses.
//!
//! # States
//!
//! ```text
//! Idle → Launching → Active → Terminating → Terminated
//! ```
//!
//! Exit handling is funnelled through one idempotent path, so the grace
//! timer, the graceful stop and the exit itself may race freely: waiters are
//! answered once and `Terminated` is emitted once per launch.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, info, warn};

use crate::config::{ConsoleKind, LaunchPlan, ALLOWED_ENV_VARS};
use crate::output::{decode_latin1, LineBuffer, LINE_TERMINATOR};
use crate::supervisor::terminal::TerminalHost;
use crate::transport::TransportClient;
use crate::{AppError, Result};

/// How long the exit path waits for output pumps to drain.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle of the supervised runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Nothing launched yet.
    Idle,
    /// Spawn in progress.
    Launching,
    /// Runtime running.
    Active,
    /// Terminate requested; waiting for exit.
    Terminating,
    /// Runtime gone.
    Terminated,
}

/// Output stream of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Notification emitted by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A complete output line, terminator re-appended.
    Output {
        /// Stream the line came from.
        stream: OutputStream,
        /// Line text.
        text: String,
    },
    /// The runtime is gone.
    Terminated,
}

#[derive(Debug)]
struct Inner {
    state: SupervisorState,
    no_debug: bool,
    console: ConsoleKind,
    grace: Duration,
    pid: Option<u32>,
    /// Asks the monitor task to hard-kill the child.
    kill_tx: Option<oneshot::Sender<()>>,
    timer: Option<JoinHandle<()>>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    stdout: LineBuffer,
    stderr: LineBuffer,
    /// Whether `Terminated` was already emitted for the current launch.
    terminated_sent: bool,
}

impl Inner {
    fn is_active(&self) -> bool {
        matches!(
            self.state,
            SupervisorState::Active | SupervisorState::Terminating
        )
    }

    fn buffer(&mut self, stream: OutputStream) -> &mut LineBuffer {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }
}

/// Launches and terminates the runtime.
///
/// Cheap to clone; clones share the same process state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Mutex<Inner>>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    transport: TransportClient,
    terminal: Arc<dyn TerminalHost>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor").finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    /// Create an idle supervisor.
    ///
    /// Output lines and termination are reported on `events`. In debug mode
    /// the graceful stop is a `terminate` request sent through `transport`.
    #[must_use]
    pub fn new(
        events: mpsc::UnboundedSender<SupervisorEvent>,
        transport: TransportClient,
        terminal: Arc<dyn TerminalHost>,
    ) -> Self {
        let mut stdout = LineBuffer::new();
        let mut stderr = LineBuffer::new();
        for (buffer, stream) in [
            (&mut stdout, OutputStream::Stdout),
            (&mut stderr, OutputStream::Stderr),
        ] {
            let events = events.clone();
            buffer.on(move |line| {
                let _ = events.send(SupervisorEvent::Output {
                    stream,
                    text: format!("{line}{LINE_TERMINATOR}"),
                });
            });
        }

        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SupervisorState::Idle,
                no_debug: false,
                console: ConsoleKind::Debug,
                grace: Duration::from_millis(5000),
                pid: None,
                kill_tx: None,
                timer: None,
                waiters: Vec::new(),
                stdout,
                stderr,
                terminated_sent: false,
            })),
            events,
            transport,
            terminal,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SupervisorState {
        self.inner.lock().await.state
    }

    /// Whether a launched runtime is still running.
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_active()
    }

    /// Process id of the captured child, if running.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.pid
    }

    // ── Launch ────────────────────────────────────────────────────────────────

    /// Start the runtime described by `plan`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Process`]`("runtime already running")` while active.
    /// - [`AppError::Process`]`("Failed to launch runtime: …")` on spawn
    ///   failure; `Terminated` is emitted as well.
    pub async fn launch(&self, plan: &LaunchPlan) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_active() {
            return Err(AppError::Process("runtime already running".into()));
        }

        inner.state = SupervisorState::Launching;
        inner.no_debug = plan.no_debug;
        inner.console = plan.console;
        inner.grace = plan.grace;
        inner.terminated_sent = false;
        inner.stdout.clear();
        inner.stderr.clear();

        match plan.console {
            ConsoleKind::Terminal => {
                let command = terminal_command(plan);
                if let Err(err) = self.terminal.run(&plan.working_dir, &command) {
                    Self::launch_failed(&mut inner, &self.events);
                    return Err(AppError::Process(format!(
                        "Failed to launch runtime: {}",
                        err.message()
                    )));
                }
                inner.state = SupervisorState::Active;
                info!(runtime = %plan.runtime.display(), "supervisor: runtime started in terminal");
            }
            ConsoleKind::Debug => {
                let mut child = match spawn_runtime(plan) {
                    Ok(child) => child,
                    Err(err) => {
                        Self::launch_failed(&mut inner, &self.events);
                        return Err(err);
                    }
                };

                let mut pumps = Vec::with_capacity(2);
                if let Some(stdout) = child.stdout.take() {
                    pumps.push(tokio::spawn(pump(
                        Arc::clone(&self.inner),
                        stdout,
                        OutputStream::Stdout,
                    )));
                }
                if let Some(stderr) = child.stderr.take() {
                    pumps.push(tokio::spawn(pump(
                        Arc::clone(&self.inner),
                        stderr,
                        OutputStream::Stderr,
                    )));
                }

                let (kill_tx, kill_rx) = oneshot::channel();
                inner.pid = child.id();
                inner.kill_tx = Some(kill_tx);
                inner.state = SupervisorState::Active;
                info!(
                    pid = ?inner.pid,
                    runtime = %plan.runtime.display(),
                    args = ?plan.args,
                    "supervisor: runtime spawned"
                );

                tokio::spawn(monitor(self.clone(), child, kill_rx, pumps));
            }
        }
        Ok(())
    }

    fn launch_failed(inner: &mut Inner, events: &mpsc::UnboundedSender<SupervisorEvent>) {
        inner.state = SupervisorState::Terminated;
        inner.terminated_sent = true;
        let _ = events.send(SupervisorEvent::Terminated);
    }

    // ── Terminate ─────────────────────────────────────────────────────────────

    /// Stop the runtime and wait until it is gone.
    ///
    /// If nothing is running this answers at once (emitting `Terminated` if
    /// it was not emitted before). Concurrent calls share one termination
    /// sequence; each caller is answered exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`] if the debuggee rejects the `terminate`
    /// request. The grace timer still escalates to a hard kill.
    pub async fn terminate(&self) -> Result<()> {
        let (rx, first) = {
            let mut inner = self.inner.lock().await;
            if !inner.is_active() {
                if !inner.terminated_sent {
                    inner.terminated_sent = true;
                    let _ = self.events.send(SupervisorEvent::Terminated);
                }
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters.push(tx);

            if inner.state == SupervisorState::Terminating {
                (rx, None)
            } else {
                inner.state = SupervisorState::Terminating;
                let grace = inner.grace;
                let this = self.clone();
                inner.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    this.force_kill().await;
                }));
                (rx, Some((inner.no_debug, inner.console, inner.pid)))
            }
        };

        if let Some((no_debug, console, pid)) = first {
            info!(no_debug, ?console, "supervisor: terminating runtime");
            let this = self.clone();
            tokio::spawn(async move { this.graceful_stop(no_debug, console, pid).await });
        }

        rx.await
            .unwrap_or_else(|_| Err(AppError::Process("terminate abandoned".into())))
    }

    async fn graceful_stop(&self, no_debug: bool, console: ConsoleKind, pid: Option<u32>) {
        if !no_debug {
            match self.transport.send("terminate", None, None).await {
                Ok(_) => debug!("supervisor: terminate acknowledged"),
                // A closed socket means the runtime is already going away.
                Err(err) if self.transport.is_connected().await => {
                    warn!(%err, "supervisor: terminate request failed");
                    let waiters = std::mem::take(&mut self.inner.lock().await.waiters);
                    for waiter in waiters {
                        let _ = waiter.send(Err(AppError::Process(format!(
                            "Could not terminate the runtime debugger: {}",
                            err.message()
                        ))));
                    }
                }
                Err(err) => debug!(%err, "supervisor: terminate request ended with connection"),
            }
            return;
        }

        let result = match console {
            ConsoleKind::Terminal => self.terminal.interrupt(),
            ConsoleKind::Debug => self.signal_stop(pid).await,
        };
        if let Err(err) = result {
            warn!(%err, "supervisor: graceful stop failed; waiting for hard kill");
        }
    }

    #[cfg(unix)]
    #[allow(clippy::unused_async)]
    async fn signal_stop(&self, pid: Option<u32>) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = pid.and_then(|id| i32::try_from(id).ok()) else {
            return Ok(());
        };
        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|err| AppError::Process(format!("failed to signal runtime: {err}")))
    }

    #[cfg(not(unix))]
    async fn signal_stop(&self, _pid: Option<u32>) -> Result<()> {
        // No console break signal without a console; escalate directly.
        self.request_kill().await;
        Ok(())
    }

    async fn request_kill(&self) {
        let kill_tx = self.inner.lock().await.kill_tx.take();
        if let Some(kill_tx) = kill_tx {
            let _ = kill_tx.send(());
        }
    }

    /// Grace period elapsed: kill the child or dispose the terminal.
    async fn force_kill(&self) {
        let console = {
            let mut inner = self.inner.lock().await;
            // This task is the timer; drop its handle instead of aborting it.
            inner.timer = None;
            if !inner.is_active() {
                return;
            }
            inner.console
        };

        warn!("supervisor: grace period expired; killing runtime");
        match console {
            ConsoleKind::Debug => self.request_kill().await,
            ConsoleKind::Terminal => {
                self.terminal.dispose();
                // No exit notification exists for terminals.
                self.handle_exit(None).await;
            }
        }
    }

    /// Idempotent exit path: cancel the timer, flush partial lines, answer
    /// waiters and emit `Terminated`.
    async fn handle_exit(&self, status: Option<ExitStatus>) {
        let (waiters, partial) = {
            let mut inner = self.inner.lock().await;
            if !inner.is_active() {
                return;
            }
            inner.state = SupervisorState::Terminated;
            inner.pid = None;
            inner.kill_tx = None;
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            let partial = [
                (OutputStream::Stdout, inner.stdout.flush()),
                (OutputStream::Stderr, inner.stderr.flush()),
            ];
            inner.terminated_sent = true;
            (std::mem::take(&mut inner.waiters), partial)
        };

        info!(code = ?status.and_then(|s| s.code()), "supervisor: runtime exited");

        for (stream, line) in partial {
            if !line.is_empty() {
                let _ = self.events.send(SupervisorEvent::Output {
                    stream,
                    text: format!("{line}{LINE_TERMINATOR}"),
                });
            }
        }
        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
        let _ = self.events.send(SupervisorEvent::Terminated);
    }
}

// ── Child process plumbing ────────────────────────────────────────────────────

fn spawn_runtime(plan: &LaunchPlan) -> Result<Child> {
    let mut cmd = Command::new(&plan.runtime);
    cmd.args(&plan.args);

    // Strip inherited environment, then pass only the allowlist.
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    cmd.current_dir(&plan.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn()
        .map_err(|err| AppError::Process(format!("Failed to launch runtime: {err}")))
}

/// Command line typed into a terminal host.
fn terminal_command(plan: &LaunchPlan) -> String {
    let name = plan
        .runtime
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut command = format!(".{}{name}", std::path::MAIN_SEPARATOR);
    for arg in &plan.args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

/// Feed one output stream into its line buffer until EOF.
async fn pump<R>(inner: Arc<Mutex<Inner>>, stream: R, which: OutputStream)
where
    R: AsyncRead + Unpin + Send,
{
    let mut chunks = FramedRead::new(stream, BytesCodec::new());
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => {
                let text = decode_latin1(&bytes);
                inner.lock().await.buffer(which).feed(&text);
            }
            Err(err) => {
                debug!(?which, %err, "supervisor: output stream failed");
                break;
            }
        }
    }
}

/// Wait for the child to exit (or kill it on request), then run the exit
/// path once its output has drained.
async fn monitor(
    supervisor: ProcessSupervisor,
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    pumps: Vec<JoinHandle<()>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            if let Err(err) = child.start_kill() {
                warn!(%err, "supervisor: hard kill failed");
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(%err, "supervisor: waiting for runtime failed");
            None
        }
    };

    for pump in pumps {
        if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await.is_err() {
            debug!("supervisor: output pump did not drain in time");
        }
    }

    supervisor.handle_exit(status).await;
}
