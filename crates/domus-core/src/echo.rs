//! The diagnostic echo channel.
//!
//! Every user-visible diagnostic (module failures, teardown failures, tick
//! handler failures) goes through a single synchronous [`Echo`] sink. The sink
//! is fire-and-forget: a panicking sink is swallowed at the call site and never
//! unwinds back into the core.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{CauseChain, Error};

/// Sink for diagnostic messages.
pub trait Echo: Send + Sync {
    /// Deliver one line of diagnostic output.
    fn echo(&self, message: &str);
}

impl<F> Echo for F
where
    F: Fn(&str) + Send + Sync,
{
    fn echo(&self, message: &str) {
        self(message)
    }
}

/// Echo sink that forwards to `tracing` under the `domus::echo` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEcho;

impl Echo for TracingEcho {
    fn echo(&self, message: &str) {
        tracing::warn!(target: "domus::echo", "{}", message);
    }
}

/// Echo sink that keeps every message in memory.
///
/// Useful for hosts that poll diagnostics instead of receiving them, and in tests.
#[derive(Debug, Default)]
pub struct BufferedEcho {
    lines: Mutex<Vec<String>>,
}

impl BufferedEcho {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every message received so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return every message received so far.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Whether any received message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|line| line.contains(needle))
    }
}

impl Echo for BufferedEcho {
    fn echo(&self, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

/// Cloneable handle to the process's echo sink.
#[derive(Clone)]
pub struct EchoChannel {
    sink: Arc<dyn Echo>,
}

impl EchoChannel {
    pub fn new(sink: Arc<dyn Echo>) -> Self {
        Self { sink }
    }

    /// Deliver one message. Panics raised by the sink are swallowed.
    pub fn say(&self, message: &str) {
        let sink = &self.sink;
        if catch_unwind(AssertUnwindSafe(|| sink.echo(message))).is_err() {
            tracing::error!("echo sink panicked while reporting: {}", message);
        }
    }

    /// Deliver the chained report for an error.
    pub fn report(&self, error: &Error) {
        for line in error.report_lines() {
            self.say(&line);
        }
    }

    /// Deliver a cause chain under `label`.
    pub fn report_causes(&self, label: &str, causes: &CauseChain) {
        for line in causes.report_lines(label) {
            self.say(&line);
        }
    }
}

impl Default for EchoChannel {
    fn default() -> Self {
        Self::new(Arc::new(TracingEcho))
    }
}

impl std::fmt::Debug for EchoChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoChannel").finish_non_exhaustive()
    }
}
