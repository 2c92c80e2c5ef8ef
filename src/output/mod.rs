//! Debuggee console output handling.
//!
//! - `line_buffer`: reassembles arbitrary output chunks into complete lines.

pub mod line_buffer;

pub use line_buffer::{decode_latin1, LineBuffer, LINE_TERMINATOR};
