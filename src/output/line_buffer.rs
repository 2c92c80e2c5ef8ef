//! Line reassembly for debuggee output streams.
//!
//! Process output arrives in arbitrarily sized chunks that do not respect
//! line boundaries. [`LineBuffer`] keeps the trailing partial line between
//! calls to [`LineBuffer::feed`] and hands every completed line to the
//! registered listeners.

/// Line terminator used by the host platform.
#[cfg(windows)]
pub const LINE_TERMINATOR: &str = "\r\n";

/// Line terminator used by the host platform.
#[cfg(not(windows))]
pub const LINE_TERMINATOR: &str = "\n";

/// Callback invoked with each completed line (terminator stripped).
pub type LineListener = Box<dyn FnMut(&str) + Send>;

/// Accumulates text chunks and emits complete lines.
#[derive(Default)]
pub struct LineBuffer {
    pending: String,
    listeners: Vec<LineListener>,
}

impl std::fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineBuffer")
            .field("pending", &self.pending)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl LineBuffer {
    /// Create an empty buffer with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for completed lines.
    pub fn on(&mut self, listener: impl FnMut(&str) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Append `chunk`, emit every line it completes and keep the remainder.
    ///
    /// Returns the number of lines emitted.
    pub fn feed(&mut self, chunk: &str) -> usize {
        self.pending.push_str(chunk);

        let mut start = 0;
        let mut emitted = 0;
        while let Some(offset) = self.pending[start..].find(LINE_TERMINATOR) {
            let end = start + offset;
            let line = self.pending[start..end].to_owned();
            for listener in &mut self.listeners {
                listener(&line);
            }
            emitted += 1;
            start = end + LINE_TERMINATOR.len();
        }

        if start > 0 {
            self.pending.drain(..start);
        }
        emitted
    }

    /// Return and clear the current partial line.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Partial line currently buffered.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drop any buffered partial line.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Decode raw process output bytes as Latin-1.
///
/// The runtime writes its console output in a single-byte encoding, so
/// every byte maps to exactly one code point and no chunk boundary can
/// split a character.
#[must_use]
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
