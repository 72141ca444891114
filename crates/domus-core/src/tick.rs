//! Tick broadcast.
//!
//! A tick fans out to every live context's handlers first, then to the
//! process-wide handlers. Both lists are snapshotted before dispatch, so a
//! context created or unloaded while a tick is in flight may or may not be
//! visited, and handlers may add or remove handlers without deadlocking.
//! Nothing here owns a timer; the host drives `tick`.

use std::sync::Arc;

use crate::context::ContextState;
use crate::echo::EchoChannel;
use crate::handlers::{HandlerList, TickHandler, invoke_guarded};
use crate::registry::ContextRegistry;

/// Counts from one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub contexts_visited: usize,
    pub handlers_invoked: usize,
    pub failures: usize,
}

/// Dispatches ticks to contexts and process-wide handlers.
#[derive(Clone)]
pub struct TickBroadcaster {
    registry: Arc<ContextRegistry>,
    handlers: Arc<HandlerList>,
    echo: EchoChannel,
}

impl TickBroadcaster {
    pub fn new(registry: Arc<ContextRegistry>, echo: EchoChannel) -> Self {
        Self {
            registry,
            handlers: Arc::new(HandlerList::new()),
            echo,
        }
    }

    /// Register a process-wide handler. Duplicates are allowed.
    pub fn add_handler(&self, handler: TickHandler) {
        self.handlers.add(handler);
    }

    /// Remove the first registration of `handler`; `false` if absent.
    pub fn remove_handler(&self, handler: &TickHandler) -> bool {
        self.handlers.remove(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Broadcast one tick.
    ///
    /// Never fails: a handler that errors or panics is echoed, counted and
    /// skipped.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for context in self.registry.snapshot() {
            if context.state() >= ContextState::Unloading {
                continue;
            }
            report.contexts_visited += 1;
            let target = format!("context {}", context.name());
            for handler in context.tick_handlers().snapshot() {
                self.dispatch(&target, &handler, &mut report);
            }
        }

        for handler in self.handlers.snapshot() {
            self.dispatch("process handler", &handler, &mut report);
        }

        if report.failures > 0 {
            tracing::debug!(
                "tick: {} contexts, {} handlers, {} failures",
                report.contexts_visited,
                report.handlers_invoked,
                report.failures
            );
        }
        report
    }

    fn dispatch(&self, target: &str, handler: &TickHandler, report: &mut TickReport) {
        report.handlers_invoked += 1;
        if let Err(causes) = invoke_guarded(handler) {
            report.failures += 1;
            tracing::warn!("tick handler for {} failed: {}", target, causes);
            self.echo
                .report_causes(&format!("Tick failure in {}", target), &causes);
        }
    }
}

impl std::fmt::Debug for TickBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickBroadcaster")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
