//! Debuggee wire protocol.
//!
//! - `codec`: hex-length-prefixed frame codec for `tokio_util` framing.
//! - `message`: request, response and event envelopes.

pub mod codec;
pub mod message;

pub use codec::{encode_frame, FrameCodec, InboundFrame};
pub use message::{Event, Inbound, Request, Response};
