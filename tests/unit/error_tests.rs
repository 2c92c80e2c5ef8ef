//! Unit tests for `AppError` display, response codes and payload messages.

use serde_json::json;

use runtime_dap::errors::error_message;
use runtime_dap::AppError;

/// Each variant renders with its category prefix.
#[test]
fn display_includes_category_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Connection("x".into()), "connection: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Request("x".into()), "request: x"),
        (AppError::Process("x".into()), "process: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

/// Only configuration problems are reported as 400.
#[test]
fn codes_split_config_from_runtime_failures() {
    assert_eq!(AppError::Config("bad".into()).code(), 400);
    for err in [
        AppError::Connection("x".into()),
        AppError::Protocol("x".into()),
        AppError::Request("x".into()),
        AppError::Process("x".into()),
        AppError::Io("x".into()),
    ] {
        assert_eq!(err.code(), 500, "{err}");
    }
}

/// `message` strips the category prefix.
#[test]
fn message_is_unprefixed() {
    let err = AppError::Request("Not connected to debuggee".into());
    assert_eq!(err.message(), "Not connected to debuggee");
}

/// I/O, JSON and TOML errors convert into their categories.
#[test]
fn foreign_errors_convert() {
    let io: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
    assert!(matches!(io, AppError::Io(ref msg) if msg == "missing"));

    let json: AppError = serde_json::from_str::<serde_json::Value>("{")
        .expect_err("truncated json")
        .into();
    assert!(matches!(json, AppError::Protocol(_)));

    let toml: AppError = toml::from_str::<toml::Value>("= 1")
        .expect_err("invalid toml")
        .into();
    assert!(matches!(toml, AppError::Config(_)));
}

/// Debuggee error payloads are reduced to readable text.
#[test]
fn error_payload_messages() {
    assert_eq!(error_message(&json!({"message": "not paused"})), "not paused");
    assert_eq!(error_message(&json!("plain text")), "plain text");
    assert_eq!(error_message(&json!({"code": 3})), "unknown error");
    assert_eq!(error_message(&json!(null)), "unknown error");
    assert_eq!(error_message(&json!(42)), "42");
}
