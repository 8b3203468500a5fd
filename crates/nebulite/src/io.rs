//! Output plumbing for command execution.
//!
//! Commands like `echo` do not write to stdout directly; they go through a
//! [`PrintWriter`] owned by the global space. This keeps the engine embeddable
//! and lets tests collect output as a string instead of capturing process
//! streams.

/// Sink for text produced by commands.
pub trait PrintWriter: Send {
    /// Writes one line of command output (no trailing newline in `text`).
    fn print_line(&mut self, text: &str);
}

/// Default writer: forwards to stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn print_line(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Collects output into an owned string, one line per `print_line` call.
///
/// Used by tests and by hosts that surface engine output themselves.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Output collected so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    /// Consumes the writer and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn print_line(&mut self, text: &str) {
        self.0.push_str(text);
        self.0.push('\n');
    }
}

/// Clonable writer over a shared buffer.
///
/// Unlike [`CollectStringPrint`], the buffer stays readable after the writer
/// has been handed to the engine, so tests keep one clone and assert on it.
#[derive(Debug, Clone, Default)]
pub struct SharedPrint(std::sync::Arc<std::sync::Mutex<String>>);

impl SharedPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the output collected so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl PrintWriter for SharedPrint {
    fn print_line(&mut self, text: &str) {
        let mut buffer = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        buffer.push_str(text);
        buffer.push('\n');
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn print_line(&mut self, _text: &str) {}
}
