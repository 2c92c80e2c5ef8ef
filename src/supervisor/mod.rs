//! Runtime process supervision.
//!
//! - `process`: launch, output capture and graceful-then-forced termination.
//! - `terminal`: the terminal-host boundary used by `consoleType: "terminal"`.

pub mod process;
pub mod terminal;

pub use process::{OutputStream, ProcessSupervisor, SupervisorEvent, SupervisorState};
pub use terminal::{ConsoleTerminal, TerminalHost};
