//! Notifications the session raises towards the front end.

use serde_json::{json, Value};

/// Output category of an [`Notification::Output`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    /// Debuggee standard output.
    Stdout,
    /// Debuggee standard error.
    Stderr,
    /// Adapter diagnostics the user should see.
    Important,
}

impl OutputCategory {
    /// DAP category string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Important => "important",
        }
    }
}

/// Session-level event for the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The debuggee accepts configuration requests.
    Initialized,
    /// Execution resumed.
    Continued {
        /// Thread that resumed.
        thread_id: i64,
    },
    /// Execution halted.
    Stopped {
        /// Front-end stop reason (`step`, `breakpoint`, …).
        reason: String,
        /// Thread that halted.
        thread_id: i64,
    },
    /// A line of output.
    Output {
        /// Output category.
        category: OutputCategory,
        /// Text including its line terminator.
        text: String,
    },
    /// The debug session ended.
    Terminated,
}

impl Notification {
    /// DAP event name.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Continued { .. } => "continued",
            Self::Stopped { .. } => "stopped",
            Self::Output { .. } => "output",
            Self::Terminated => "terminated",
        }
    }

    /// DAP event body.
    #[must_use]
    pub fn body(&self) -> Option<Value> {
        match self {
            Self::Initialized | Self::Terminated => None,
            Self::Continued { thread_id } => Some(json!({
                "threadId": thread_id,
                "allThreadsContinued": true,
            })),
            Self::Stopped { reason, thread_id } => Some(json!({
                "reason": reason,
                "threadId": thread_id,
                "allThreadsStopped": true,
            })),
            Self::Output { category, text } => Some(json!({
                "category": category.as_str(),
                "output": text,
            })),
        }
    }
}
