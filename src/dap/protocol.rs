//! Debug Adapter Protocol envelopes.
//!
//! Only the generic request/response/event shapes live here; command
//! arguments and bodies stay as [`Value`] and are interpreted by the session.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::session::Notification;
use crate::AppError;

/// Request sent by the front end.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DapRequest {
    /// Front-end sequence number; echoed as `request_seq`.
    pub seq: i64,
    /// Message type; always `"request"` for requests.
    #[serde(rename = "type")]
    pub kind: String,
    /// Command name (e.g. `setBreakpoints`).
    pub command: String,
    /// Command arguments.
    #[serde(default)]
    pub arguments: Value,
}

impl DapRequest {
    /// Build a request envelope.
    #[must_use]
    pub fn new(seq: i64, command: &str, arguments: Value) -> Self {
        Self {
            seq,
            kind: "request".to_owned(),
            command: command.to_owned(),
            arguments,
        }
    }
}

/// Answer to one [`DapRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct DapResponse {
    /// Sequence number of the request being answered.
    pub request_seq: i64,
    /// Command of the request being answered.
    pub command: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Error text for failed requests.
    pub message: Option<String>,
    /// Command-specific body.
    pub body: Option<Value>,
}

impl DapResponse {
    /// Successful response carrying `body`.
    #[must_use]
    pub fn success(request: &DapRequest, body: Option<Value>) -> Self {
        Self {
            request_seq: request.seq,
            command: request.command.clone(),
            success: true,
            message: None,
            body,
        }
    }

    /// Failed response; the body carries the numeric code (400/500) and
    /// the message.
    #[must_use]
    pub fn error(request: &DapRequest, err: &AppError) -> Self {
        Self {
            request_seq: request.seq,
            command: request.command.clone(),
            success: false,
            message: Some(err.message().to_owned()),
            body: Some(json!({
                "error": {
                    "id": err.code(),
                    "format": err.message(),
                    "showUser": true,
                }
            })),
        }
    }
}

/// Message queued for the front end. The writer assigns `seq`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Response to a request.
    Response(DapResponse),
    /// Unsolicited event.
    Event {
        /// Event name.
        event: String,
        /// Event body.
        body: Option<Value>,
    },
}

impl Outgoing {
    /// Wire form with sequence number `seq`.
    #[must_use]
    pub fn to_json(&self, seq: i64) -> Value {
        match self {
            Self::Response(response) => {
                let mut message = json!({
                    "seq": seq,
                    "type": "response",
                    "request_seq": response.request_seq,
                    "success": response.success,
                    "command": response.command,
                });
                if let Some(text) = &response.message {
                    message["message"] = Value::String(text.clone());
                }
                if let Some(body) = &response.body {
                    message["body"] = body.clone();
                }
                message
            }
            Self::Event { event, body } => {
                let mut message = json!({
                    "seq": seq,
                    "type": "event",
                    "event": event,
                });
                if let Some(body) = body {
                    message["body"] = body.clone();
                }
                message
            }
        }
    }
}

/// Handle for sending responses and events to the front end.
///
/// Cheap to clone. Sends after the writer has gone are dropped.
#[derive(Debug, Clone)]
pub struct Frontend {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Frontend {
    /// Create a handle and the receiver the writer drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Answer `request` with `result`.
    pub fn respond(&self, request: &DapRequest, result: crate::Result<Option<Value>>) {
        let response = match result {
            Ok(body) => DapResponse::success(request, body),
            Err(err) => {
                tracing::debug!(command = %request.command, %err, "dap: request failed");
                DapResponse::error(request, &err)
            }
        };
        let _ = self.tx.send(Outgoing::Response(response));
    }

    /// Send a session notification as a DAP event.
    pub fn notify(&self, notification: &Notification) {
        let _ = self.tx.send(Outgoing::Event {
            event: notification.event_name().to_owned(),
            body: notification.body(),
        });
    }
}
