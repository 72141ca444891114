//! The owned service tying the registry, lifecycle manager and tick
//! broadcaster together.

use std::sync::Arc;

use crate::config::LoaderConfig;
use crate::context::ContextHandle;
use crate::echo::{Echo, EchoChannel};
use crate::error::Result;
use crate::handlers::TickHandler;
use crate::lifecycle::LifecycleManager;
use crate::loader::Loader;
use crate::registry::ContextRegistry;
use crate::tick::{TickBroadcaster, TickReport};

/// Entry point for hosts.
///
/// Dropping the service unloads every context still registered.
pub struct RegistryService {
    registry: Arc<ContextRegistry>,
    lifecycle: LifecycleManager,
    ticks: TickBroadcaster,
    echo: EchoChannel,
}

impl RegistryService {
    /// Service echoing diagnostics to `tracing`.
    pub fn new(loader: Loader) -> Self {
        Self::with_echo_channel(loader, EchoChannel::default())
    }

    /// Service echoing diagnostics to `echo`.
    pub fn with_echo(loader: Loader, echo: Arc<dyn Echo>) -> Self {
        Self::with_echo_channel(loader, EchoChannel::new(echo))
    }

    /// Service loading native modules with the given search configuration.
    pub fn from_config(config: &LoaderConfig, echo: Arc<dyn Echo>) -> Self {
        Self::with_echo(Loader::from_config(config), echo)
    }

    fn with_echo_channel(loader: Loader, echo: EchoChannel) -> Self {
        let registry = Arc::new(ContextRegistry::new());
        let lifecycle = LifecycleManager::new(registry.clone(), Arc::new(loader), echo.clone());
        let ticks = TickBroadcaster::new(registry.clone(), echo.clone());
        Self {
            registry,
            lifecycle,
            ticks,
            echo,
        }
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn ticks(&self) -> &TickBroadcaster {
        &self.ticks
    }

    pub fn echo(&self) -> &EchoChannel {
        &self.echo
    }

    /// See [`LifecycleManager::create`].
    pub fn create(
        &self,
        name: impl Into<String>,
        module_ref: impl Into<String>,
        parameters: Vec<String>,
    ) -> Result<ContextHandle> {
        self.lifecycle.create(name, module_ref, parameters)
    }

    /// See [`LifecycleManager::unload`].
    pub fn unload(&self, name: &str) -> Result<()> {
        self.lifecycle.unload(name)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.lifecycle.is_active(name)
    }

    pub fn context(&self, name: &str) -> Option<ContextHandle> {
        self.lifecycle.context(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.lifecycle.names()
    }

    pub fn echo_contexts(&self) {
        self.lifecycle.echo_contexts();
    }

    pub fn tick(&self) -> TickReport {
        self.ticks.tick()
    }

    pub fn add_handler(&self, handler: TickHandler) {
        self.ticks.add_handler(handler);
    }

    pub fn remove_handler(&self, handler: &TickHandler) -> bool {
        self.ticks.remove_handler(handler)
    }

    /// Unload every live context. Returns how many were unloaded.
    pub fn shutdown(&self) -> usize {
        let unloaded = self.lifecycle.unload_all();
        if unloaded > 0 {
            tracing::info!("shutdown unloaded {} context(s)", unloaded);
        }
        unloaded
    }
}

impl Drop for RegistryService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RegistryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryService")
            .field("registry", &self.registry)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::BufferedEcho;
    use crate::handlers::tick_handler;
    use crate::loader::ModuleCatalog;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_shutdown_unloads_live_contexts() {
        let catalog = Arc::new(ModuleCatalog::new());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        catalog.register_fn("wait", move |_, _| {
            let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
            Ok(0)
        });

        let service = RegistryService::with_echo(Loader::new(catalog), Arc::new(BufferedEcho::new()));
        service.create("a", "wait", Vec::new()).unwrap();
        service.create("b", "wait", Vec::new()).unwrap();

        assert_eq!(service.shutdown(), 2);
        assert!(service.names().is_empty());
        assert_eq!(service.shutdown(), 0);
        drop(release_tx);
    }

    #[test]
    fn test_process_handlers_through_service() {
        let service = RegistryService::with_echo(
            Loader::new(Arc::new(ModuleCatalog::new())),
            Arc::new(BufferedEcho::new()),
        );
        let handler = tick_handler(|| Ok(()));

        service.add_handler(handler.clone());
        assert_eq!(service.tick().handlers_invoked, 1);
        assert!(service.remove_handler(&handler));
        assert_eq!(service.tick().handlers_invoked, 0);
    }
}
