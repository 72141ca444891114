//! Host-facing bridge for Domus.
//!
//! Native hosts embed Domus through this crate: either the Rust
//! [`HostBridge`] API or the C ABI in [`ffi`]. Everything crossing the
//! boundary is a boolean or a count; diagnostics go to the echo channel.
//!
//! # Module Structure
//!
//! - `cmdline` - Splitting parameter blobs into argument lists
//! - `ffi` - `extern "C"` surface over an opaque `HostBridge` pointer

pub mod cmdline;
pub mod ffi;

use std::sync::{Arc, Weak};

use domus_core::{Echo, Error, LoaderConfig, RegistryService, TickReport};

pub use cmdline::{CommandLineError, split_command_line};

/// Handle a host calls to drive one tick.
///
/// Holds the service weakly: once the bridge is dropped, ticks are no-ops.
#[derive(Clone, Debug)]
pub struct TickDriver {
    service: Weak<RegistryService>,
}

impl TickDriver {
    /// Broadcast one tick. `None` if the bridge is gone.
    pub fn tick(&self) -> Option<TickReport> {
        self.service.upgrade().map(|service| service.tick())
    }
}

/// Host component that decides when ticks happen.
///
/// Receives the driver once, at registration, and calls
/// [`TickDriver::tick`] on every drive event (a rendered frame, a timer).
pub trait TickSink {
    fn attach(&self, driver: &TickDriver);
}

impl<F> TickSink for F
where
    F: Fn(&TickDriver),
{
    fn attach(&self, driver: &TickDriver) {
        self(driver)
    }
}

/// Callback receiving one live context name per call.
pub trait ContextVisitor<D: ?Sized> {
    fn visit(&mut self, name: &str, user_data: &D);
}

impl<D: ?Sized, F> ContextVisitor<D> for F
where
    F: FnMut(&str, &D),
{
    fn visit(&mut self, name: &str, user_data: &D) {
        self(name, user_data)
    }
}

/// Facade a native host drives.
#[derive(Debug)]
pub struct HostBridge {
    service: Arc<RegistryService>,
    driver: TickDriver,
}

impl HostBridge {
    pub fn new(service: RegistryService) -> Self {
        let service = Arc::new(service);
        let driver = TickDriver {
            service: Arc::downgrade(&service),
        };
        Self { service, driver }
    }

    /// Bridge loading native modules found through `config`.
    pub fn from_config(config: &LoaderConfig, echo: Arc<dyn Echo>) -> Self {
        Self::new(RegistryService::from_config(config, echo))
    }

    pub fn service(&self) -> &RegistryService {
        &self.service
    }

    pub fn driver(&self) -> &TickDriver {
        &self.driver
    }

    /// Hand the tick driver to the host.
    pub fn register_tick_sink(&self, sink: &dyn TickSink) {
        sink.attach(&self.driver);
        tracing::debug!("tick sink registered");
    }

    /// Call `visitor` once per live context, passing `user_data` through.
    ///
    /// Visits a snapshot, so the visitor may call back into the bridge.
    /// Returns the number of names visited.
    pub fn enumerate_contexts<D: ?Sized>(
        &self,
        visitor: &mut dyn ContextVisitor<D>,
        user_data: &D,
    ) -> u32 {
        let mut count = 0u32;
        for name in self.service.names() {
            visitor.visit(&name, user_data);
            count = count.saturating_add(1);
        }
        count
    }

    /// Create a context running `module_ref`, its parameters split from
    /// `parameters_blob`.
    ///
    /// Returns `true` once the context is registered and its thread started.
    pub fn create(&self, name: &str, module_ref: &str, parameters_blob: &str) -> bool {
        let parameters = match split_command_line(parameters_blob) {
            Ok(parameters) => parameters,
            Err(e) => {
                self.service
                    .echo()
                    .say(&format!("Could not parse parameters for context {}: {}", name, e));
                return false;
            }
        };

        match self.service.create(name, module_ref, parameters) {
            Ok(_) => true,
            Err(Error::NameConflict(_)) => {
                let echo = self.service.echo();
                echo.say(&format!(
                    "Could not create context {}. The context already exists.",
                    name
                ));
                echo.say("Choose another name to launch another module, including the same one.");
                false
            }
            Err(e) => {
                tracing::error!("create {} failed: {}", name, e);
                self.service.echo().report(&e);
                false
            }
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.service.is_active(name)
    }

    /// Unload a context. `false` if no live context has this name.
    pub fn unload(&self, name: &str) -> bool {
        self.service.unload(name).is_ok()
    }

    pub fn tick(&self) -> TickReport {
        self.service.tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domus_core::{BufferedEcho, Loader, ModuleCatalog};
    use std::cell::RefCell;

    fn bridge() -> (HostBridge, Arc<BufferedEcho>) {
        let echo = Arc::new(BufferedEcho::new());
        let service = RegistryService::with_echo(
            Loader::new(Arc::new(ModuleCatalog::new())),
            echo.clone(),
        );
        (HostBridge::new(service), echo)
    }

    #[test]
    fn test_driver_outlives_bridge_safely() {
        let (bridge, _) = bridge();
        let held = RefCell::new(None);
        bridge.register_tick_sink(&|driver: &TickDriver| {
            *held.borrow_mut() = Some(driver.clone());
        });

        let driver = held.into_inner().unwrap();
        assert!(driver.tick().is_some());
        drop(bridge);
        assert!(driver.tick().is_none());
    }

    #[test]
    fn test_enumerate_empty() {
        let (bridge, _) = bridge();
        let mut seen = Vec::new();
        let count = bridge.enumerate_contexts(
            &mut |name: &str, _: &()| seen.push(name.to_string()),
            &(),
        );
        assert_eq!(count, 0);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_create_rejects_nul_in_parameters() {
        let (bridge, echo) = bridge();
        assert!(!bridge.create("a", "m", "x\0y"));
        assert!(echo.contains("Could not parse parameters for context a"));
        assert!(!bridge.is_active("a"));
    }

    #[test]
    fn test_unload_unknown_is_false() {
        let (bridge, _) = bridge();
        assert!(!bridge.unload("ghost"));
    }
}
