//! Error types shared across the adapter.

use std::fmt::{Display, Formatter};

use serde_json::Value;

/// Shared adapter result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Response code reported upstream for invalid launch or attach parameters.
pub const CODE_CONFIG: u16 = 400;

/// Response code reported upstream for connection, launch and runtime failures.
pub const CODE_RUNTIME: u16 = 500;

/// Adapter error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Missing or invalid launch/attach parameters, missing files or folders.
    Config(String),
    /// Socket-level failure talking to the debuggee.
    Connection(String),
    /// Malformed frame header or payload received from the debuggee.
    Protocol(String),
    /// The debuggee answered with an error, or the transport was not connected.
    Request(String),
    /// Spawning, signalling or supervising the debuggee process failed.
    Process(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl AppError {
    /// Response code surfaced to the front end for this error.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Config(_) => CODE_CONFIG,
            _ => CODE_RUNTIME,
        }
    }

    /// Message without the category prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Connection(msg)
            | Self::Protocol(msg)
            | Self::Request(msg)
            | Self::Process(msg)
            | Self::Io(msg) => msg,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Request(msg) => write!(f, "request: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("invalid json: {err}"))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

/// Derive a human-readable message from an error payload reported by the
/// debuggee.
///
/// Structured payloads contribute their `message` field; strings are used
/// verbatim; anything else is rendered as compact JSON.
#[must_use]
pub fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => "unknown error".to_owned(),
        },
        Value::Null => "unknown error".to_owned(),
        other => other.to_string(),
    }
}
