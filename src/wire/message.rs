//! Message envelopes exchanged with the debuggee.
//!
//! | Direction | Shape                                          |
//! |-----------|------------------------------------------------|
//! | outbound  | `{"id": n, "request": "name", "params"?: …}`   |
//! | inbound   | `{"id": n, "error"?: …, "response"?: …}`       |
//! | inbound   | `{"event": "name", "body"?: …}`                |

use serde::Serialize;
use serde_json::Value;

/// Event emitted by the debuggee once its debug port is ready for requests.
pub const EVENT_CONNECTED: &str = "connected";

/// Event emitted by the debuggee whenever execution halts.
pub const EVENT_STOPPED: &str = "stopped";

/// Event emitted by the debuggee when the script finished and it shuts down.
pub const EVENT_DISCONNECTED: &str = "disconnected";

/// Locally synthesized event: the initial connect failed or an established
/// connection broke.
pub const EVENT_CONNECTION_ERROR: &str = "connectionError";

/// Locally synthesized event: an established connection was closed.
pub const EVENT_CONNECTION_CLOSED: &str = "connectionClosed";

/// Locally synthesized event: a frame could not be decoded.
pub const EVENT_ERROR: &str = "error";

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Correlation identifier, unique per connection.
    pub id: u64,
    /// Request name (e.g. `continue`).
    pub request: String,
    /// Request-specific parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Response to a previously sent [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Identifier of the request being answered; `0` when absent.
    pub id: u64,
    /// Error payload; present means the request failed.
    pub error: Option<Value>,
    /// Result payload.
    pub response: Option<Value>,
}

/// Unsolicited notification from the debuggee (or synthesized locally).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name.
    pub event: String,
    /// Full decoded payload, including the `event` key.
    pub payload: Value,
}

impl Event {
    /// Build a locally synthesized event carrying `body`.
    #[must_use]
    pub fn local(name: &str, body: Option<Value>) -> Self {
        let mut payload = serde_json::Map::new();
        payload.insert("event".to_owned(), Value::String(name.to_owned()));
        if let Some(body) = body {
            payload.insert("body".to_owned(), body);
        }
        Self {
            event: name.to_owned(),
            payload: Value::Object(payload),
        }
    }

    /// The event's `body` field, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.payload.get("body")
    }
}

/// A decoded inbound payload, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Payload carried an `event` key.
    Event(Event),
    /// Any other payload is treated as a response.
    Response(Response),
}

impl Inbound {
    /// Classify a decoded JSON payload.
    ///
    /// Payloads with a non-empty string `event` key are events; everything
    /// else is a response whose missing or non-numeric `id` becomes `0`,
    /// which never matches an issued request.
    #[must_use]
    pub fn classify(payload: Value) -> Self {
        if let Some(name) = payload
            .get("event")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
        {
            return Self::Event(Event {
                event: name.to_owned(),
                payload,
            });
        }

        let id = payload.get("id").and_then(Value::as_u64).unwrap_or(0);
        let error = payload.get("error").filter(|v| is_truthy(v)).cloned();
        let response = payload.get("response").cloned();
        Self::Response(Response {
            id,
            error,
            response,
        })
    }
}

/// Whether an `error` field value signals failure.
///
/// `null`, `false`, `0` and `""` are treated as "no error".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
