//! Execution contexts and the handle modules use to talk to theirs.
//!
//! A context is one isolated execution unit: a module reference, its
//! parameters, a lifecycle state and the per-context state a running module
//! registers (tick handlers and teardown hooks).
//!
//! Isolation is a dedicated OS thread plus this per-context state. There is no
//! memory isolation between contexts.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::CauseChain;
use crate::handlers::{HandlerList, HandlerResult, TickHandler};

/// Lifecycle state of a context.
///
/// Transitions only move forward:
/// `Created → Running → Terminated` on natural completion,
/// `Running → Unloading → Terminated` on explicit unload, and
/// `Created → Unloading → Terminated` when a context is unloaded before its
/// thread started the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ContextState {
    Created = 0,
    Running = 1,
    Unloading = 2,
    Terminated = 3,
}

impl ContextState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Unloading,
            _ => Self::Terminated,
        }
    }
}

type TeardownHook = Box<dyn FnOnce() -> HandlerResult + Send>;

/// One isolated execution unit.
pub struct ExecutionContext {
    name: String,
    module_ref: String,
    parameters: Vec<String>,
    state: AtomicU8,
    tick_handlers: HandlerList,
    // `None` once teardown has collected the hooks.
    teardown_hooks: Mutex<Option<Vec<TeardownHook>>>,
}

impl ExecutionContext {
    /// Create a context in the `Created` state.
    pub fn new(
        name: impl Into<String>,
        module_ref: impl Into<String>,
        parameters: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            module_ref: module_ref.into(),
            parameters,
            state: AtomicU8::new(ContextState::Created as u8),
            tick_handlers: HandlerList::new(),
            teardown_hooks: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_ref(&self) -> &str {
        &self.module_ref
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Name given to the context's execution thread.
    pub fn thread_name(&self) -> String {
        format!("{} context main", self.name)
    }

    /// Tick handlers registered by the context's module.
    pub fn tick_handlers(&self) -> &HandlerList {
        &self.tick_handlers
    }

    /// Move the state forward to `to`.
    ///
    /// Returns `false` without changing anything if the context is already at
    /// or past `to`.
    pub(crate) fn advance(&self, to: ContextState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= to as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Register a hook run during teardown.
    ///
    /// Hooks run in reverse order of registration. A hook registered after
    /// teardown has finished is run immediately.
    pub fn on_teardown(&self, hook: impl FnOnce() -> HandlerResult + Send + 'static) {
        let hook: TeardownHook = Box::new(hook);
        let late = {
            let mut hooks = self
                .teardown_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match hooks.as_mut() {
                Some(pending) => {
                    pending.push(hook);
                    None
                }
                None => Some(hook),
            }
        };

        if let Some(hook) = late {
            if let Err(causes) = run_hook(hook) {
                tracing::warn!(
                    "late teardown hook for context {} failed: {}",
                    self.name,
                    causes
                );
            }
        }
    }

    /// Release the context's resources and mark it `Terminated`.
    ///
    /// Stops ticking the context, then runs every teardown hook. Each hook is
    /// isolated; the failures are returned, one chain per failed hook.
    pub(crate) fn teardown(&self) -> Vec<CauseChain> {
        self.tick_handlers.clear();

        let hooks = self
            .teardown_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();

        let failures = hooks
            .into_iter()
            .rev()
            .filter_map(|hook| run_hook(hook).err())
            .collect();

        self.advance(ContextState::Terminated);
        failures
    }
}

fn run_hook(hook: TeardownHook) -> std::result::Result<(), CauseChain> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(CauseChain::from_error(err.as_ref())),
        Err(payload) => Err(CauseChain::from_panic(payload.as_ref())),
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.name)
            .field("module_ref", &self.module_ref)
            .field("parameters", &self.parameters)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A module's view of the context it runs in.
///
/// Cheap to clone; every clone refers to the same context.
#[derive(Clone, Debug)]
pub struct ContextHandle {
    inner: Arc<ExecutionContext>,
}

impl ContextHandle {
    pub(crate) fn new(inner: Arc<ExecutionContext>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn module_ref(&self) -> &str {
        self.inner.module_ref()
    }

    pub fn parameters(&self) -> &[String] {
        self.inner.parameters()
    }

    pub fn state(&self) -> ContextState {
        self.inner.state()
    }

    /// Receive every tick broadcast while this context is live.
    pub fn add_tick_handler(&self, handler: TickHandler) {
        self.inner.tick_handlers().add(handler);
    }

    /// Stop receiving ticks through `handler`. No-op if it was never added.
    pub fn remove_tick_handler(&self, handler: &TickHandler) -> bool {
        self.inner.tick_handlers().remove(handler)
    }

    /// See [`ExecutionContext::on_teardown`].
    pub fn on_teardown(&self, hook: impl FnOnce() -> HandlerResult + Send + 'static) {
        self.inner.on_teardown(hook);
    }

    /// Whether both handles refer to the same context.
    pub fn same_context(&self, other: &ContextHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tick_handler;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn test_context_creation() {
        let ctx = ExecutionContext::new("alpha", "mods/alpha.so", vec!["--x".into(), "1".into()]);
        assert_eq!(ctx.name(), "alpha");
        assert_eq!(ctx.module_ref(), "mods/alpha.so");
        assert_eq!(ctx.parameters(), &["--x".to_string(), "1".to_string()]);
        assert_eq!(ctx.state(), ContextState::Created);
        assert_eq!(ctx.thread_name(), "alpha context main");
    }

    #[test]
    fn test_state_only_moves_forward() {
        let ctx = ExecutionContext::new("a", "m", Vec::new());

        assert!(ctx.advance(ContextState::Running));
        assert!(!ctx.advance(ContextState::Running));
        assert!(ctx.advance(ContextState::Unloading));
        assert!(!ctx.advance(ContextState::Running));
        assert!(ctx.advance(ContextState::Terminated));
        assert!(!ctx.advance(ContextState::Unloading));
        assert_eq!(ctx.state(), ContextState::Terminated);
    }

    #[test]
    fn test_unload_before_start_blocks_running() {
        let ctx = ExecutionContext::new("a", "m", Vec::new());
        assert!(ctx.advance(ContextState::Unloading));
        assert!(!ctx.advance(ContextState::Running));
    }

    #[test]
    fn test_teardown_hook_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let ctx = ExecutionContext::new("a", "m", Vec::new());

        for i in 1..=2 {
            let order = order.clone();
            ctx.on_teardown(move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        assert!(ctx.teardown().is_empty());
        // Hooks run in reverse order (LIFO)
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
        assert_eq!(ctx.state(), ContextState::Terminated);
    }

    #[test]
    fn test_teardown_isolates_failing_hooks() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let ctx = ExecutionContext::new("a", "m", Vec::new());

        ctx.on_teardown(move || {
            ran_clone.store(true, Ordering::SeqCst);
            Ok(())
        });
        ctx.on_teardown(|| panic!("hook panic"));
        ctx.on_teardown(|| Err("handle leak".into()));

        let failures = ctx.teardown();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].outer(), "handle leak");
        assert_eq!(failures[1].outer(), "panicked: hook panic");
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_teardown_clears_tick_handlers_and_runs_hooks_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let ctx = ExecutionContext::new("a", "m", Vec::new());
        ctx.tick_handlers().add(tick_handler(|| Ok(())));

        let runs_clone = runs.clone();
        ctx.on_teardown(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        ctx.teardown();
        ctx.teardown();

        assert!(ctx.tick_handlers().is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_hook_runs_immediately() {
        let ran = Arc::new(AtomicBool::new(false));
        let ctx = ExecutionContext::new("a", "m", Vec::new());
        ctx.teardown();

        let ran_clone = ran.clone();
        ctx.on_teardown(move || {
            ran_clone.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_handle_tick_registration() {
        let handle = ContextHandle::new(Arc::new(ExecutionContext::new("a", "m", Vec::new())));
        let handler = tick_handler(|| Ok(()));

        handle.add_tick_handler(handler.clone());
        assert_eq!(handle.inner.tick_handlers().len(), 1);
        assert!(handle.remove_tick_handler(&handler));
        assert!(!handle.remove_tick_handler(&handler));
        assert!(handle.same_context(&handle.clone()));
    }
}
