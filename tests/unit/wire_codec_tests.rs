//! Unit tests for the debuggee frame codec and inbound classification.
//!
//! Frames are `LLLLLLLL\r\n<json>\r\n` where the header is the payload
//! length as eight lowercase hex digits.

use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::Decoder;

use runtime_dap::wire::{encode_frame, FrameCodec, Inbound, InboundFrame, Request};

const PAUSE_FRAME: &[u8] = b"0000001a\r\n{\"id\":1,\"request\":\"pause\"}\r\n";
const OK_FRAME: &[u8] = b"00000018\r\n{\"id\":1,\"response\":\"ok\"}\r\n";

fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<InboundFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(buf).expect("decoder reports bad frames inline") {
        frames.push(frame);
    }
    frames
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// A request without params encodes to the exact documented bytes.
#[test]
fn request_encodes_with_hex_header() {
    let request = Request {
        id: 1,
        request: "pause".into(),
        params: None,
    };
    let frame = encode_frame(&request).expect("encode request");
    assert_eq!(&frame[..], PAUSE_FRAME);
}

/// Params are serialized when present.
#[test]
fn request_params_are_included() {
    let request = Request {
        id: 4,
        request: "stopOnExceptions".into(),
        params: Some(json!(true)),
    };
    let frame = encode_frame(&request).expect("encode request");
    let text = String::from_utf8(frame.to_vec()).expect("utf8 frame");
    assert!(text.ends_with("{\"id\":4,\"request\":\"stopOnExceptions\",\"params\":true}\r\n"));
    assert!(text.starts_with("00000033\r\n"));
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// A complete frame decodes to its JSON payload and consumes the buffer.
#[test]
fn complete_frame_decodes() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(OK_FRAME);

    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(
        frames,
        vec![InboundFrame::Message(json!({"id": 1, "response": "ok"}))]
    );
    assert!(buf.is_empty());
}

/// Several frames arriving in one read decode in order.
#[test]
fn concatenated_frames_decode_in_order() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(OK_FRAME);
    buf.extend_from_slice(PAUSE_FRAME);

    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(
        frames,
        vec![
            InboundFrame::Message(json!({"id": 1, "response": "ok"})),
            InboundFrame::Message(json!({"id": 1, "request": "pause"})),
        ]
    );
}

/// Feeding the same bytes one at a time yields the same frames.
#[test]
fn byte_by_byte_delivery_is_equivalent() {
    let mut stream = Vec::new();
    stream.extend_from_slice(PAUSE_FRAME);
    stream.extend_from_slice(OK_FRAME);

    let mut whole_codec = FrameCodec::new();
    let mut whole = BytesMut::from(&stream[..]);
    let expected = decode_all(&mut whole_codec, &mut whole);

    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();
    for byte in &stream {
        buf.extend_from_slice(&[*byte]);
        frames.extend(decode_all(&mut codec, &mut buf));
    }

    assert_eq!(frames, expected);
    assert_eq!(frames.len(), 2);
}

/// A short header waits for more bytes and leaves the buffer intact.
#[test]
fn partial_header_waits() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&b"0000"[..]);
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
    assert_eq!(&buf[..], b"0000");
}

/// Invalid JSON with a correct length costs only that frame.
#[test]
fn invalid_json_is_skipped() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"00000003\r\n{x}\r\n");
    buf.extend_from_slice(OK_FRAME);

    let frames = decode_all(&mut codec, &mut buf);
    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[0], InboundFrame::Malformed(_)));
    assert_eq!(
        frames[1],
        InboundFrame::Message(json!({"id": 1, "response": "ok"}))
    );
}

/// A non-hex header is reported and the buffered bytes are dropped.
#[test]
fn non_hex_header_is_malformed() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&b"zzzzzzzz\r\n{}\r\n"[..]);

    let frames = decode_all(&mut codec, &mut buf);
    match frames.as_slice() {
        [InboundFrame::Malformed(reason)] => assert!(reason.contains("zzzzzzzz")),
        other => panic!("expected one malformed frame, got {other:?}"),
    }
    assert!(buf.is_empty());
}

/// A signed length header is rejected even though it parses as hex.
#[test]
fn signed_header_is_malformed() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&b"+000001a\r\n{\"id\":1,\"response\":\"okokok\"}\r\n"[..]);

    let frames = decode_all(&mut codec, &mut buf);
    match frames.as_slice() {
        [InboundFrame::Malformed(reason)] => assert!(reason.contains("+000001a"), "{reason}"),
        other => panic!("expected one malformed frame, got {other:?}"),
    }
}

/// A declared length that disagrees with the payload is detected.
#[test]
fn length_mismatch_is_malformed() {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(&b"00000002\r\n{}xx\r\n"[..]);

    let frames = decode_all(&mut codec, &mut buf);
    match frames.as_slice() {
        [InboundFrame::Malformed(reason)] => assert!(reason.contains("declared length 2")),
        other => panic!("expected one malformed frame, got {other:?}"),
    }
}

// ── Classification ────────────────────────────────────────────────────────────

/// Payloads with an `event` key are events and keep the full payload.
#[test]
fn event_payload_is_classified_as_event() {
    let payload = json!({"event": "stopped", "body": {"reason": "breakpoint"}});
    match Inbound::classify(payload.clone()) {
        Inbound::Event(event) => {
            assert_eq!(event.event, "stopped");
            assert_eq!(event.payload, payload);
            assert_eq!(event.body(), Some(&json!({"reason": "breakpoint"})));
        }
        Inbound::Response(other) => panic!("expected event, got {other:?}"),
    }
}

/// A falsy `error` field does not mark the response as failed.
#[test]
fn falsy_error_is_ignored() {
    match Inbound::classify(json!({"id": 3, "error": null, "response": [1]})) {
        Inbound::Response(response) => {
            assert_eq!(response.id, 3);
            assert_eq!(response.error, None);
            assert_eq!(response.response, Some(json!([1])));
        }
        Inbound::Event(other) => panic!("expected response, got {other:?}"),
    }
}

/// A response without a numeric id gets id 0, which never matches.
#[test]
fn missing_id_becomes_zero() {
    match Inbound::classify(json!({"response": "orphan"})) {
        Inbound::Response(response) => assert_eq!(response.id, 0),
        Inbound::Event(other) => panic!("expected response, got {other:?}"),
    }
}
