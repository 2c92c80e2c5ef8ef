//! Debug Adapter Protocol front end.
//!
//! - `codec`: `Content-Length` framing.
//! - `protocol`: request/response/event envelopes and the [`Frontend`] handle.
//! - `server`: stdio and TCP endpoints, one session per connection.

pub mod codec;
pub mod protocol;
pub mod server;

pub use codec::DapCodec;
pub use protocol::{DapRequest, DapResponse, Frontend, Outgoing};
pub use server::{serve_listener, serve_stdio, serve_stream, serve_tcp};
