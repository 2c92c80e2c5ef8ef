//! Unit tests for DAP envelopes and session notifications.

use serde_json::{json, Value};

use runtime_dap::dap::{DapRequest, DapResponse, Frontend, Outgoing};
use runtime_dap::session::{Notification, OutputCategory};
use runtime_dap::AppError;

// ── Requests and responses ────────────────────────────────────────────────────

/// Requests deserialize from wire form; missing arguments become null.
#[test]
fn request_parses_from_wire_form() {
    let request: DapRequest =
        serde_json::from_value(json!({"seq": 4, "type": "request", "command": "threads"}))
            .expect("parse request");
    assert_eq!(request, DapRequest::new(4, "threads", Value::Null));
}

/// Successful responses echo the request and omit `message`.
#[test]
fn success_response_wire_form() {
    let request = DapRequest::new(2, "threads", Value::Null);
    let response = DapResponse::success(&request, Some(json!({"threads": []})));
    let wire = Outgoing::Response(response).to_json(10);

    assert_eq!(
        wire,
        json!({
            "seq": 10,
            "type": "response",
            "request_seq": 2,
            "success": true,
            "command": "threads",
            "body": {"threads": []},
        })
    );
}

/// Runtime failures report code 500 with the bare message.
#[test]
fn runtime_error_response_uses_500() {
    let request = DapRequest::new(3, "attach", Value::Null);
    let err = AppError::Connection("Could not connect to runtime at localhost:9090".into());
    let wire = Outgoing::Response(DapResponse::error(&request, &err)).to_json(1);

    assert_eq!(wire["success"], false);
    assert_eq!(wire["message"], "Could not connect to runtime at localhost:9090");
    assert_eq!(wire["body"]["error"]["id"], 500);
    assert_eq!(
        wire["body"]["error"]["format"],
        "Could not connect to runtime at localhost:9090"
    );
}

/// The frontend handle queues responses and events in call order.
#[test]
fn frontend_queues_in_order() {
    let (frontend, mut rx) = Frontend::channel();
    let request = DapRequest::new(1, "pause", Value::Null);

    frontend.respond(&request, Ok(None));
    frontend.notify(&Notification::Terminated);

    match rx.try_recv().expect("response queued") {
        Outgoing::Response(response) => assert!(response.success),
        other => panic!("expected response, got {other:?}"),
    }
    assert_eq!(
        rx.try_recv().expect("event queued"),
        Outgoing::Event {
            event: "terminated".into(),
            body: None,
        }
    );
}

// ── Notifications ─────────────────────────────────────────────────────────────

/// Stopped events carry the reason, thread and all-threads flag.
#[test]
fn stopped_notification_body() {
    let notification = Notification::Stopped {
        reason: "step".into(),
        thread_id: 7,
    };
    assert_eq!(notification.event_name(), "stopped");
    assert_eq!(
        notification.body(),
        Some(json!({"reason": "step", "threadId": 7, "allThreadsStopped": true}))
    );
}

/// Continued events report every thread as resumed.
#[test]
fn continued_notification_body() {
    let notification = Notification::Continued { thread_id: 1 };
    assert_eq!(
        notification.body(),
        Some(json!({"threadId": 1, "allThreadsContinued": true}))
    );
}

/// Output events carry their category string.
#[test]
fn output_notification_body() {
    let notification = Notification::Output {
        category: OutputCategory::Stderr,
        text: "boom\n".into(),
    };
    assert_eq!(notification.event_name(), "output");
    assert_eq!(
        notification.body(),
        Some(json!({"category": "stderr", "output": "boom\n"}))
    );
    assert_eq!(OutputCategory::Important.as_str(), "important");
}

/// Initialized and terminated have no body.
#[test]
fn bodiless_notifications() {
    assert_eq!(Notification::Initialized.body(), None);
    assert_eq!(Notification::Terminated.body(), None);
    assert_eq!(Notification::Initialized.event_name(), "initialized");
}
