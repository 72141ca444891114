//! Core engine for Domus execution contexts.
//!
//! This crate provides:
//! - A registry of named, isolated execution contexts, one thread each
//! - Module loading with a by-path then by-name fallback
//! - Teardown that runs exactly once, from unload or natural completion
//! - A failure-isolating tick broadcast into every live context
//! - A synchronous diagnostic echo channel

pub mod config;
pub mod context;
pub mod echo;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod loader;
pub mod registry;
pub mod service;
pub mod tick;

pub use config::{LoaderConfig, MODULE_PATH_ENV};
pub use context::{ContextHandle, ContextState, ExecutionContext};
pub use echo::{BufferedEcho, Echo, EchoChannel, TracingEcho};
pub use error::{BoxError, CauseChain, Error, MAX_NESTED_CAUSES, Result};
pub use handlers::{HandlerList, HandlerResult, TickHandler, tick_handler};
pub use lifecycle::LifecycleManager;
pub use loader::{
    DylibModule, DylibResolver, FnModule, LoadOutcome, Loader, Module, ModuleCatalog,
    ModuleResolver, Strategy,
};
pub use registry::ContextRegistry;
pub use service::RegistryService;
pub use tick::{TickBroadcaster, TickReport};
