//! `Content-Length` framing for Debug Adapter Protocol messages.
//!
//! ```text
//! Content-Length: 119\r\n
//! \r\n
//! {"seq":1,"type":"request",...}
//! ```
//!
//! Header names are matched case-insensitively; headers other than
//! `Content-Length` are ignored.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Blank line terminating the header block.
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Longest header block accepted before the blank line: 8 KiB.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Largest message body accepted: 16 MiB.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Codec for DAP messages.
#[derive(Debug, Default)]
pub struct DapCodec {
    /// Body length of the message in progress once its headers are consumed.
    content_length: Option<usize>,
}

impl DapCodec {
    /// Create a codec expecting a header block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_content_length(headers: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(headers)
        .map_err(|_| AppError::Protocol("DAP header is not valid UTF-8".into()))?;

    let mut length = None;
    for line in text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse::<usize>().map_err(|err| {
                    AppError::Protocol(format!("invalid Content-Length '{}': {err}", value.trim()))
                })?;
                length = Some(parsed);
            }
        }
    }

    let length =
        length.ok_or_else(|| AppError::Protocol("missing Content-Length header".into()))?;
    if length > MAX_BODY_BYTES {
        return Err(AppError::Protocol(format!(
            "DAP message too long: {length} bytes exceeds {MAX_BODY_BYTES}"
        )));
    }
    Ok(length)
}

impl Decoder for DapCodec {
    type Item = Value;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        let length = if let Some(length) = self.content_length {
            length
        } else {
            let Some(end) = src
                .windows(HEADER_END.len())
                .position(|window| window == HEADER_END)
            else {
                if src.len() > MAX_HEADER_BYTES {
                    return Err(AppError::Protocol("DAP header block too long".into()));
                }
                return Ok(None);
            };

            let length = parse_content_length(&src[..end])?;
            src.advance(end + HEADER_END.len());
            self.content_length = Some(length);
            length
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.content_length = None;
        let body = src.split_to(length);
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| AppError::Protocol(format!("invalid DAP message: {err}")))
    }
}

impl Encoder<Value> for DapCodec {
    type Error = AppError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<()> {
        let body = serde_json::to_vec(&item)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
