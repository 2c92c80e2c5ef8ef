//! Length-prefixed frame codec for the debuggee wire protocol.
//!
//! Every frame is laid out as
//!
//! ```text
//! LLLLLLLL\r\n<json payload>\r\n
//! ```
//!
//! where `LLLLLLLL` is the payload's byte length as eight lowercase,
//! zero-padded hex digits.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use runtime_dap::wire::codec::FrameCodec;
//!
//! let frames = FramedRead::new(read_half, FrameCodec::new());
//! ```
//!
//! Malformed frames are yielded as [`InboundFrame::Malformed`] instead of
//! decoder errors: `FramedRead` ends the stream after the first error, and
//! a bad frame must only cost that one frame.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::{AppError, Result};

/// Number of hex digits in the length header.
pub const HEADER_DIGITS: usize = 8;

/// Terminator following the header and the payload.
pub const FRAME_TERMINATOR: &[u8] = b"\r\n";

/// Largest payload the decoder accepts: 64 MiB.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A complete frame whose payload parsed as JSON.
    Message(Value),
    /// A frame that could not be decoded; carries a diagnostic message.
    Malformed(String),
}

/// Codec for the debuggee's hex-length-prefixed JSON frames.
///
/// # Decoder
///
/// Keeps the declared length of the frame in progress between calls, so
/// a frame may arrive split across any number of reads and several frames
/// may arrive in one read. Returns `Ok(None)` while bytes are missing.
///
/// # Encoder
///
/// Serialises any [`Serialize`] item to compact JSON and wraps it in the
/// frame layout above.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Declared payload length of the frame in progress, once its header
    /// has been consumed.
    pending_length: Option<usize>,
}

impl FrameCodec {
    /// Create a codec expecting a frame header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a header from `src`, returning `Ok(None)` if incomplete.
    fn decode_header(src: &mut BytesMut) -> std::result::Result<Option<usize>, String> {
        if src.len() < HEADER_DIGITS {
            return Ok(None);
        }

        let header = &src[..HEADER_DIGITS];
        // Exactly eight hex digits, no sign.
        if !header.iter().all(u8::is_ascii_hexdigit) {
            return Err(format!(
                "invalid frame length header '{}'",
                header.escape_ascii()
            ));
        }
        let digits =
            std::str::from_utf8(header).map_err(|_| "missing response length".to_owned())?;
        let length = usize::from_str_radix(digits, 16)
            .map_err(|_| format!("invalid frame length header '{digits}'"))?;

        if src.len() < HEADER_DIGITS + FRAME_TERMINATOR.len() {
            return Ok(None);
        }
        if &src[HEADER_DIGITS..HEADER_DIGITS + FRAME_TERMINATOR.len()] != FRAME_TERMINATOR {
            return Err("frame header is not followed by CR LF".to_owned());
        }
        if length > MAX_FRAME_BYTES {
            return Err(format!(
                "frame too long: {length} bytes exceeds {MAX_FRAME_BYTES}"
            ));
        }

        src.advance(HEADER_DIGITS + FRAME_TERMINATOR.len());
        Ok(Some(length))
    }
}

impl Decoder for FrameCodec {
    type Item = InboundFrame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let length = match self.pending_length {
            Some(length) => length,
            None => match Self::decode_header(src) {
                Ok(Some(length)) => {
                    self.pending_length = Some(length);
                    length
                }
                Ok(None) => return Ok(None),
                Err(msg) => {
                    // Framing is lost; drop what we have and resynchronise on
                    // the next read.
                    src.clear();
                    return Ok(Some(InboundFrame::Malformed(msg)));
                }
            },
        };

        let needed = length + FRAME_TERMINATOR.len();
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }

        self.pending_length = None;
        let payload = src.split_to(length);
        let trailer_ok = &src[..FRAME_TERMINATOR.len()] == FRAME_TERMINATOR;
        src.advance(FRAME_TERMINATOR.len());

        if !trailer_ok {
            src.clear();
            return Ok(Some(InboundFrame::Malformed(format!(
                "declared length {length} does not match payload"
            ))));
        }

        trace!(length, "frame decoded");
        Ok(Some(match serde_json::from_slice::<Value>(&payload) {
            Ok(value) => InboundFrame::Message(value),
            Err(err) => InboundFrame::Malformed(err.to_string()),
        }))
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let payload = serde_json::to_vec(&item)
            .map_err(|e| AppError::Protocol(format!("failed to serialise frame: {e}")))?;
        if u32::try_from(payload.len()).is_err() {
            return Err(AppError::Protocol(format!(
                "frame too long: {} bytes",
                payload.len()
            )));
        }

        let header = format!("{:08x}", payload.len());
        dst.reserve(header.len() + payload.len() + 2 * FRAME_TERMINATOR.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(FRAME_TERMINATOR);
        dst.put_slice(&payload);
        dst.put_slice(FRAME_TERMINATOR);
        Ok(())
    }
}

/// Encode a single value as a complete frame.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the value cannot be serialised.
pub fn encode_frame<T: Serialize>(item: &T) -> Result<BytesMut> {
    let mut dst = BytesMut::new();
    FrameCodec::new().encode(item, &mut dst)?;
    Ok(dst)
}
