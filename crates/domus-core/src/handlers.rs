//! Tick handler lists.
//!
//! Used both for the process-wide handlers owned by the
//! [`TickBroadcaster`](crate::tick::TickBroadcaster) and for the per-context
//! handlers a module registers through its [`ContextHandle`](crate::ContextHandle).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{BoxError, CauseChain};

/// Result returned by a tick handler.
pub type HandlerResult = std::result::Result<(), BoxError>;

/// A tick callback. Identity is the `Arc` allocation.
pub type TickHandler = Arc<dyn Fn() -> HandlerResult + Send + Sync>;

/// Wrap a closure as a [`TickHandler`].
pub fn tick_handler<F>(f: F) -> TickHandler
where
    F: Fn() -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invoke a handler, converting an error return or a panic into a cause chain.
pub(crate) fn invoke_guarded(handler: &TickHandler) -> std::result::Result<(), CauseChain> {
    match catch_unwind(AssertUnwindSafe(|| handler())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(CauseChain::from_error(err.as_ref())),
        Err(payload) => Err(CauseChain::from_panic(payload.as_ref())),
    }
}

/// Ordered, lock-guarded list of tick handlers.
///
/// Insertion order is preserved and duplicates are allowed. Dispatch always
/// iterates over a [`snapshot`](Self::snapshot) so handlers may be added or
/// removed while a tick is in progress.
#[derive(Default)]
pub struct HandlerList {
    handlers: Mutex<Vec<TickHandler>>,
}

impl HandlerList {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TickHandler>> {
        // Pushes and removals cannot leave the vector half-updated.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a handler.
    pub fn add(&self, handler: TickHandler) {
        self.lock().push(handler);
    }

    /// Remove the first entry identical to `handler`.
    ///
    /// Returns `false` (and does nothing) if it was never added.
    pub fn remove(&self, handler: &TickHandler) -> bool {
        let mut handlers = self.lock();
        match handlers
            .iter()
            .position(|h| std::ptr::addr_eq(Arc::as_ptr(h), Arc::as_ptr(handler)))
        {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copy of the current handlers, in insertion order.
    pub fn snapshot(&self) -> Vec<TickHandler> {
        self.lock().clone()
    }

    /// Drop every handler.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for HandlerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerList")
            .field("len", &self.len())
            .finish()
    }
}
