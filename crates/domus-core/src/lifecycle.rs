//! Context creation, execution and teardown.
//!
//! # Threads
//!
//! ```text
//! create(name) ──► registry.try_insert ──► spawn "<name> context main"
//!                                                 │
//!                                                 ├── Loader::load (module runs here)
//!                                                 └── registry.remove_exact ──► teardown
//!
//! unload(name) ──► registry.remove ──► spawn "<name> teardown" ──► teardown
//! ```
//!
//! Whichever path removes the context from the registry first performs its
//! teardown; the other observes the entry missing and does nothing.
//!
//! # Unload is not a hard stop
//!
//! An OS thread cannot be killed safely from inside the process. Unloading
//! removes the context from the registry, stops ticking it, runs its teardown
//! hooks and marks it `Terminated`, but the module keeps running on its
//! thread until it returns on its own. There is no cancellation signal. A
//! module that must be stoppable at any point belongs in its own process.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;

use crate::context::{ContextHandle, ContextState, ExecutionContext};
use crate::echo::EchoChannel;
use crate::error::{CauseChain, Error, Result};
use crate::loader::{LoadOutcome, Loader, Strategy};
use crate::registry::ContextRegistry;

/// Creates, runs and tears down contexts.
///
/// Cheap to clone; clones share the registry, loader and echo channel.
#[derive(Clone)]
pub struct LifecycleManager {
    registry: Arc<ContextRegistry>,
    loader: Arc<Loader>,
    echo: EchoChannel,
}

impl LifecycleManager {
    pub fn new(registry: Arc<ContextRegistry>, loader: Arc<Loader>, echo: EchoChannel) -> Self {
        Self {
            registry,
            loader,
            echo,
        }
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Register a new context and start its module on a dedicated thread.
    ///
    /// Returns as soon as the context is registered and its thread spawned;
    /// the module may not have started yet. A name already in use yields
    /// [`Error::NameConflict`] and changes nothing.
    pub fn create(
        &self,
        name: impl Into<String>,
        module_ref: impl Into<String>,
        parameters: Vec<String>,
    ) -> Result<ContextHandle> {
        let context = Arc::new(ExecutionContext::new(name, module_ref, parameters));
        let name = context.name().to_string();
        // Thread names cannot hold NUL.
        if name.contains('\0') {
            return Err(Error::InvalidParameters(format!(
                "context name {:?} contains a NUL byte",
                name
            )));
        }

        if !self.registry.try_insert(context.clone()) {
            return Err(Error::NameConflict(name));
        }

        let this = self.clone();
        let thread_context = context.clone();
        let spawned = thread::Builder::new()
            .name(context.thread_name())
            .spawn(move || this.run_context(thread_context));

        if let Err(source) = spawned {
            if self.registry.remove_exact(&context).is_some() {
                context.teardown();
            }
            return Err(Error::Spawn {
                context: name,
                source,
            });
        }

        tracing::info!(
            "created context {} (module {}, {} parameters)",
            name,
            context.module_ref(),
            context.parameters().len()
        );
        Ok(ContextHandle::new(context))
    }

    /// Body of a context's execution thread.
    fn run_context(&self, context: Arc<ExecutionContext>) {
        let name = context.name().to_string();

        if context.advance(ContextState::Running) {
            let handle = ContextHandle::new(context.clone());
            match catch_unwind(AssertUnwindSafe(|| self.loader.load(&handle))) {
                Ok(Ok(outcome)) => self.report_outcome(&name, &outcome),
                Ok(Err(err)) => {
                    tracing::error!("context {} failed: {}", name, err);
                    self.echo.report(&err);
                }
                Err(payload) => {
                    let err = Error::RuntimeFailure {
                        context: name.clone(),
                        causes: CauseChain::from_panic(payload.as_ref()),
                    };
                    tracing::error!("context {} failed: {}", name, err);
                    self.echo.report(&err);
                }
            }
        } else {
            tracing::debug!("context {} was unloaded before its module started", name);
        }

        if self.registry.remove_exact(&context).is_some() {
            tracing::debug!("context {} finished; tearing down", name);
            self.teardown(&context);
        } else {
            tracing::debug!("context {} finished after it was unloaded", name);
        }
    }

    fn report_outcome(&self, name: &str, outcome: &LoadOutcome) {
        if outcome.strategy == Strategy::Fallback {
            if let Some(primary) = &outcome.primary_failure {
                tracing::info!(
                    "context {} loaded its module by name after: {}",
                    name,
                    primary
                );
            }
        }
        if outcome.parameters_dropped {
            self.echo.say(&format!(
                "Context {}: the module found by name takes no parameters; they were dropped.",
                name
            ));
        }
        if outcome.exit_code != 0 {
            self.echo.say(&format!(
                "Context {}: module exited with code {}.",
                name, outcome.exit_code
            ));
        } else {
            tracing::debug!("context {} module completed", name);
        }
    }

    /// Release a context's resources. Never panics.
    fn teardown(&self, context: &ExecutionContext) {
        let failures = match catch_unwind(AssertUnwindSafe(|| context.teardown())) {
            Ok(failures) => failures,
            Err(payload) => vec![CauseChain::from_panic(payload.as_ref())],
        };

        for causes in failures {
            let err = Error::TeardownFailure {
                context: context.name().to_string(),
                causes,
            };
            tracing::warn!("{}", err);
            self.echo.report(&err);
        }
        tracing::debug!("context {} torn down", context.name());
    }

    /// Unregister a context and tear it down on a separate thread.
    ///
    /// Returns once the context is unregistered; teardown completes later.
    pub fn unload(&self, name: &str) -> Result<()> {
        let context = self
            .registry
            .remove(name)
            .ok_or_else(|| Error::ContextNotFound(name.to_string()))?;
        context.advance(ContextState::Unloading);
        tracing::info!("unloading context {}", name);

        let this = self.clone();
        let teardown_context = context.clone();
        let spawned = thread::Builder::new()
            .name(format!("{} teardown", name))
            .spawn(move || this.teardown(&teardown_context));

        if let Err(e) = spawned {
            tracing::warn!(
                "could not spawn teardown thread for {} ({}); tearing down inline",
                name,
                e
            );
            self.teardown(&context);
        }
        Ok(())
    }

    /// Unload every live context. Returns how many were unloaded.
    pub fn unload_all(&self) -> usize {
        self.registry
            .names()
            .iter()
            .filter(|name| self.unload(name).is_ok())
            .count()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Handle to the live context called `name`.
    pub fn context(&self, name: &str) -> Option<ContextHandle> {
        self.registry.get(name).map(ContextHandle::new)
    }

    /// Names of the live contexts, in no stable order.
    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Echo the names of all live contexts.
    pub fn echo_contexts(&self) {
        let mut names = self.registry.names();
        names.sort();
        self.echo.say("Current contexts\n----------------");
        for name in names {
            self.echo.say(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::BufferedEcho;
    use crate::loader::ModuleCatalog;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn manager(catalog: Arc<ModuleCatalog>) -> (LifecycleManager, Arc<BufferedEcho>) {
        let echo = Arc::new(BufferedEcho::new());
        let manager = LifecycleManager::new(
            Arc::new(ContextRegistry::new()),
            Arc::new(Loader::new(catalog)),
            EchoChannel::new(echo.clone()),
        );
        (manager, echo)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_module_runs_on_named_thread() {
        let catalog = Arc::new(ModuleCatalog::new());
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        catalog.register_fn("namer", move |_, _| {
            let name = thread::current().name().map(str::to_string);
            tx.lock().unwrap().send(name).unwrap();
            Ok(0)
        });

        let (manager, _) = manager(catalog);
        manager.create("alpha", "namer", Vec::new()).unwrap();

        let thread_name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(thread_name.as_deref(), Some("alpha context main"));
        assert!(wait_until(|| !manager.is_active("alpha")));
    }

    #[test]
    fn test_name_with_nul_is_rejected() {
        let catalog = Arc::new(ModuleCatalog::new());
        catalog.register_fn("noop", |_, _| Ok(0));

        let (manager, _) = manager(catalog);
        assert!(matches!(
            manager.create("a\0b", "noop", Vec::new()),
            Err(Error::InvalidParameters(_))
        ));
        assert!(manager.names().is_empty());
    }

    #[test]
    fn test_duplicate_name_is_rejected_without_side_effects() {
        let catalog = Arc::new(ModuleCatalog::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);

        let runs_clone = runs.clone();
        catalog.register_fn("blocker", move |_, _| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok(0)
        });

        let (manager, echo) = manager(catalog);
        let original = manager.create("a", "blocker", Vec::new()).unwrap();
        assert!(matches!(
            manager.create("a", "blocker", Vec::new()),
            Err(Error::NameConflict(_))
        ));

        let current = manager.context("a").unwrap();
        assert!(current.same_context(&original));
        assert!(echo.lines().is_empty());

        release_tx.send(()).unwrap();
        assert!(wait_until(|| !manager.is_active("a")));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_runtime_failure_is_echoed_and_context_removed() {
        let catalog = Arc::new(ModuleCatalog::new());
        catalog.register_fn("crasher", |_, _| Err("access violation".into()));

        let (manager, echo) = manager(catalog);
        manager.create("c", "crasher", Vec::new()).unwrap();

        assert!(wait_until(|| !manager.is_active("c")));
        assert!(wait_until(|| echo.contains("Unhandled failure in context c.")));
        assert!(echo.contains("Outer failure: access violation"));
    }

    #[test]
    fn test_missing_module_echoes_and_terminates() {
        let (manager, echo) = manager(Arc::new(ModuleCatalog::new()));
        let handle = manager.create("m", "ghost", Vec::new()).unwrap();

        assert!(wait_until(|| handle.state() == ContextState::Terminated));
        assert!(!manager.is_active("m"));
        assert!(echo.contains("Module ghost not found"));
    }

    #[test]
    fn test_unload_unknown_context() {
        let (manager, _) = manager(Arc::new(ModuleCatalog::new()));
        assert!(matches!(
            manager.unload("nobody"),
            Err(Error::ContextNotFound(_))
        ));
    }

    #[test]
    fn test_teardown_failure_is_echoed() {
        let catalog = Arc::new(ModuleCatalog::new());
        catalog.register_fn("leaky", |ctx, _| {
            ctx.on_teardown(|| Err("handle still open".into()));
            Ok(0)
        });

        let (manager, echo) = manager(catalog);
        let handle = manager.create("l", "leaky", Vec::new()).unwrap();

        assert!(wait_until(|| handle.state() == ContextState::Terminated));
        assert!(wait_until(|| echo.contains("Failure tearing down context l: handle still open")));
        assert!(!manager.is_active("l"));
    }

    #[test]
    fn test_nonzero_exit_code_is_echoed() {
        let catalog = Arc::new(ModuleCatalog::new());
        catalog.register_fn("exit3", |_, _| Ok(3));

        let (manager, echo) = manager(catalog);
        manager.create("e", "exit3", Vec::new()).unwrap();
        assert!(wait_until(|| echo.contains("module exited with code 3")));
    }

    #[test]
    fn test_echo_contexts_lists_names() {
        let catalog = Arc::new(ModuleCatalog::new());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        catalog.register_fn("wait", move |_, _| {
            let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok(0)
        });

        let (manager, echo) = manager(catalog);
        manager.create("only", "wait", Vec::new()).unwrap();
        manager.echo_contexts();

        let lines = echo.lines();
        assert!(lines[0].starts_with("Current contexts"));
        assert_eq!(lines[1], "only");

        assert_eq!(manager.unload_all(), 1);
        assert!(!manager.is_active("only"));
        release_tx.send(()).unwrap();
    }
}
