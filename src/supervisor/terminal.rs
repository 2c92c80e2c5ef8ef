//! Terminal hosting for runtimes launched with `consoleType: "terminal"`.
//!
//! A [`TerminalHost`] runs a command line somewhere the user can see it and
//! accepts exactly two controls afterwards: the interrupt keystroke and
//! disposal. Output is not captured in this mode.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::ALLOWED_ENV_VARS;
use crate::{AppError, Result};

/// A persistent interactive surface the runtime can run in.
pub trait TerminalHost: Send + Sync {
    /// Show the terminal and type `command` into it, running in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`] if the terminal cannot be started.
    fn run(&self, cwd: &Path, command: &str) -> Result<()>;

    /// Deliver the interrupt keystroke (Ctrl+C).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`] if the keystroke cannot be delivered.
    fn interrupt(&self) -> Result<()>;

    /// Close the terminal and whatever still runs in it.
    fn dispose(&self);
}

/// Terminal host that runs the command through the system shell with its
/// output on the adapter's own stderr.
///
/// Stdout of the adapter may carry the DAP stream, so the shell never
/// writes there.
#[derive(Debug, Default)]
pub struct ConsoleTerminal {
    shell: Mutex<Option<Child>>,
}

impl ConsoleTerminal {
    /// Create a terminal host with nothing running.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn shell(&self) -> MutexGuard<'_, Option<Child>> {
        match self.shell.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TerminalHost for ConsoleTerminal {
    fn run(&self, cwd: &Path, command: &str) -> Result<()> {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };

        cmd.env_clear();
        for &key in ALLOWED_ENV_VARS {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }

        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(std::io::stderr()))
            .stderr(Stdio::from(std::io::stderr()))
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|err| AppError::Process(format!("failed to open terminal: {err}")))?;
        info!(pid = ?child.id(), command, "terminal: command started");

        let mut shell = self.shell();
        if let Some(mut previous) = shell.replace(child) {
            debug!("terminal: replacing previous command");
            let _ = previous.start_kill();
        }
        Ok(())
    }

    fn interrupt(&self) -> Result<()> {
        let mut shell = self.shell();
        let Some(child) = shell.as_mut() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
                return Ok(());
            };
            kill(Pid::from_raw(pid), Signal::SIGINT)
                .map_err(|err| AppError::Process(format!("failed to interrupt terminal: {err}")))
        }

        #[cfg(not(unix))]
        {
            child
                .start_kill()
                .map_err(|err| AppError::Process(format!("failed to interrupt terminal: {err}")))
        }
    }

    fn dispose(&self) {
        if let Some(mut child) = self.shell().take() {
            if let Err(err) = child.start_kill() {
                warn!(%err, "terminal: dispose failed");
            }
        }
    }
}
