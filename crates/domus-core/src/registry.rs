//! Registry of live contexts.
//!
//! A single mutex guards the whole map. It is held only for in-memory map
//! operations, never across thread creation, module code or callbacks.

use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::context::ExecutionContext;

/// Concurrency-safe mapping from context name to context.
#[derive(Default)]
pub struct ContextRegistry {
    contexts: Mutex<FxHashMap<String, Arc<ExecutionContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, Arc<ExecutionContext>>> {
        // No operation can panic halfway through a map update, so a poisoned
        // lock still guards a consistent map.
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `context` iff no live context has its name.
    ///
    /// Returns `false` without touching the map if the name is taken.
    pub fn try_insert(&self, context: Arc<ExecutionContext>) -> bool {
        match self.lock().entry(context.name().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(context);
                true
            }
        }
    }

    /// Remove and return the context registered under `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<ExecutionContext>> {
        self.lock().remove(name)
    }

    /// Remove `context` only if it is still the entry registered under its name.
    ///
    /// A context's own thread uses this so that it never removes a newer
    /// context that reused the name after an unload.
    pub fn remove_exact(&self, context: &Arc<ExecutionContext>) -> Option<Arc<ExecutionContext>> {
        let mut contexts = self.lock();
        match contexts.get(context.name()) {
            Some(current) if Arc::ptr_eq(current, context) => contexts.remove(context.name()),
            _ => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExecutionContext>> {
        self.lock().get(name).cloned()
    }

    /// Names of all live contexts at the time of the call, in no stable order.
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// All live contexts at the time of the call, in no stable order.
    pub fn snapshot(&self) -> Vec<Arc<ExecutionContext>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn context(name: &str) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(name, "module", Vec::new()))
    }

    #[test]
    fn test_insert_rejects_duplicate_names() {
        let registry = ContextRegistry::new();
        let first = context("a");

        assert!(registry.try_insert(first.clone()));
        assert!(!registry.try_insert(context("a")));

        let current = registry.get("a").unwrap();
        assert!(Arc::ptr_eq(&current, &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent_on_absence() {
        let registry = ContextRegistry::new();
        registry.try_insert(context("a"));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(!registry.contains("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_exact_ignores_replacement() {
        let registry = ContextRegistry::new();
        let old = context("a");
        registry.try_insert(old.clone());
        registry.remove("a");

        let new = context("a");
        registry.try_insert(new.clone());

        assert!(registry.remove_exact(&old).is_none());
        assert!(registry.contains("a"));
        assert!(registry.remove_exact(&new).is_some());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_names_snapshot() {
        let registry = ContextRegistry::new();
        registry.try_insert(context("a"));
        registry.try_insert(context("b"));

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_concurrent_insert_single_winner() {
        let registry = Arc::new(ContextRegistry::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.try_insert(context("shared"))
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }
}
