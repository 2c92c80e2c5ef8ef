#![forbid(unsafe_code)]

//! Debug adapter bridging a Debug Adapter Protocol front end to a script
//! runtime's framed JSON debug port.

pub mod config;
pub mod dap;
pub mod errors;
pub mod output;
pub mod session;
pub mod sourcemap;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use config::AdapterConfig;
pub use errors::{AppError, Result};
