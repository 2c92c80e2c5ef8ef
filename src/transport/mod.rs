//! Debuggee transport.
//!
//! - `client`: socket ownership, connect/retry state machine, frame I/O.
//! - `correlator`: request id allocation, response matching, event fan-out.

pub mod client;
pub mod correlator;

pub use client::{TransportClient, TransportState, DEFAULT_POLL_INTERVAL, NOT_CONNECTED};
pub use correlator::{Correlator, EventListener, RequestOutcome};
