//! Translation of debuggee stop reasons.

/// What a debuggee `stopped` event means for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopAction {
    /// The debuggee finished loading and accepts configuration.
    Initialized,
    /// Execution halted for the given front-end reason.
    Stopped(String),
}

/// Map a debuggee stop reason onto the front end's vocabulary.
///
/// Step reasons collapse into `step`, `debug` becomes `debugger statement`
/// and `initialized` is not a stop at all. Anything else passes through; a
/// missing reason is reported as `unknown`.
#[must_use]
pub fn translate_stop(reason: Option<&str>) -> StopAction {
    match reason {
        Some("initialized") => StopAction::Initialized,
        Some("stepIn" | "stepOut" | "stepOver") => StopAction::Stopped("step".to_owned()),
        Some("debug") => StopAction::Stopped("debugger statement".to_owned()),
        Some(other) => StopAction::Stopped(other.to_owned()),
        None => StopAction::Stopped("unknown".to_owned()),
    }
}
