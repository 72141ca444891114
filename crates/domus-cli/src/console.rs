//! Echo sink for the terminal.

use std::sync::atomic::{AtomicUsize, Ordering};

use domus_core::Echo;

/// Writes diagnostics to stderr and counts them.
#[derive(Debug, Default)]
pub struct ConsoleEcho {
    lines: AtomicUsize,
}

impl ConsoleEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines echoed so far.
    pub fn count(&self) -> usize {
        self.lines.load(Ordering::Relaxed)
    }
}

impl Echo for ConsoleEcho {
    fn echo(&self, message: &str) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        eprintln!("{}", message);
    }
}
