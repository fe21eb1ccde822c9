//! Output handling for the `print` builtin.

use std::io::Write as _;

/// Destination for `print` output.
///
/// Implement this to capture or redirect output from embedded scripts; the
/// VM never writes to stdout behind the host's back.
pub trait PrintWriter {
    /// Receives one complete print payload, separators and trailing
    /// newline included.
    fn write(&mut self, text: &str);
}

/// Default writer: straight to stdout, ignoring I/O errors.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Collects all output into a string. Useful for tests and for hosts that
/// surface script output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, text: &str) {
        self.0.push_str(text);
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _text: &str) {}
}
