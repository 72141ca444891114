//! Module loading with a fallback resolution strategy.
//!
//! # Policy
//!
//! ```text
//! primary.resolve(module_ref) ── ok ──► run(parameters)
//!        │
//!        └─ ModuleNotFound / ModuleLoadFailed
//!               │
//!               ▼
//! fallback.resolve(module_ref) ── ok ──► run(parameters, or none if the
//!        │                                entry point takes none)
//!        └─ load failure ──► ModuleUnavailable { primary, secondary }
//! ```
//!
//! Load failures are retried once with the fallback resolver because nothing
//! has run yet. Failures raised while the module runs are never retried: the
//! module has already taken effect.
//!
//! # Module Structure
//!
//! - `catalog` - In-process modules registered by name
//! - `dylib` - Native shared-library modules loaded via libloading

mod catalog;
mod dylib;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::config::LoaderConfig;
use crate::context::ContextHandle;
use crate::error::{BoxError, CauseChain, Error, Result};

pub use catalog::{FnModule, ModuleCatalog};
pub use dylib::{DylibModule, DylibResolver, MAIN_SYMBOL, START_SYMBOL, TICK_SYMBOL, library_file_name};

/// A loadable, runnable unit of code.
pub trait Module: Send + Sync {
    /// Whether [`run`](Self::run) uses the parameter list.
    fn accepts_parameters(&self) -> bool {
        true
    }

    /// Run the module to completion on the calling (context) thread.
    ///
    /// Returns the module's exit code.
    fn run(&self, context: &ContextHandle, parameters: &[String]) -> std::result::Result<i32, BoxError>;
}

/// Resolves a module identifier to a runnable module.
pub trait ModuleResolver: Send + Sync {
    /// Resolve `module_ref`.
    ///
    /// Implementations report a missing module as [`Error::ModuleNotFound`]
    /// and a module that exists but cannot be loaded as
    /// [`Error::ModuleLoadFailed`].
    fn resolve(&self, module_ref: &str) -> Result<Arc<dyn Module>>;
}

/// Which resolution strategy produced the module that ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Primary,
    Fallback,
}

/// Outcome of a successful load-and-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Exit code returned by the module.
    pub exit_code: i32,
    /// Strategy that resolved the module.
    pub strategy: Strategy,
    /// Primary failure, recorded when the fallback strategy succeeded.
    pub primary_failure: Option<CauseChain>,
    /// Whether parameters were dropped because the fallback entry point takes none.
    pub parameters_dropped: bool,
}

/// Loads and runs the module of a context.
pub struct Loader {
    primary: Arc<dyn ModuleResolver>,
    fallback: Option<Arc<dyn ModuleResolver>>,
}

impl Loader {
    /// Create a loader with a primary resolver and no fallback.
    pub fn new(primary: Arc<dyn ModuleResolver>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    /// Set the resolver tried after a primary load failure.
    pub fn with_fallback(mut self, fallback: Arc<dyn ModuleResolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Native-library loader: by path first, then by name over the configured
    /// module directories.
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(Arc::new(DylibResolver::by_path()))
            .with_fallback(Arc::new(DylibResolver::by_name(config.module_dirs.clone())))
    }

    /// Resolve and run the context's module.
    pub fn load(&self, context: &ContextHandle) -> Result<LoadOutcome> {
        let module_ref = context.module_ref();

        let primary_error = match self.primary.resolve(module_ref) {
            Ok(module) => {
                let exit_code = run_module(module.as_ref(), context, context.parameters())?;
                return Ok(LoadOutcome {
                    exit_code,
                    strategy: Strategy::Primary,
                    primary_failure: None,
                    parameters_dropped: false,
                });
            }
            Err(err) if err.is_load_failure() => err,
            Err(err) => return Err(err),
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };

        let primary = primary_error.cause_chain();
        tracing::debug!(
            "primary load of {} failed ({}), resolving by name",
            module_ref,
            primary
        );

        let module = match fallback.resolve(module_ref) {
            Ok(module) => module,
            Err(err) if err.is_load_failure() => {
                return Err(Error::ModuleUnavailable {
                    module: module_ref.to_string(),
                    primary,
                    secondary: err.cause_chain(),
                });
            }
            Err(err) => return Err(err),
        };

        let (parameters, parameters_dropped) = if module.accepts_parameters() {
            (context.parameters(), false)
        } else {
            (&[][..], !context.parameters().is_empty())
        };
        if parameters_dropped {
            tracing::warn!(
                "module {} resolved by name takes no parameters; dropping {} parameter(s)",
                module_ref,
                context.parameters().len()
            );
        }

        let exit_code = run_module(module.as_ref(), context, parameters)?;
        Ok(LoadOutcome {
            exit_code,
            strategy: Strategy::Fallback,
            primary_failure: Some(primary),
            parameters_dropped,
        })
    }
}

fn run_module(module: &dyn Module, context: &ContextHandle, parameters: &[String]) -> Result<i32> {
    let runtime_failure = |causes| Error::RuntimeFailure {
        context: context.name().to_string(),
        causes,
    };

    match catch_unwind(AssertUnwindSafe(|| module.run(context, parameters))) {
        Ok(Ok(code)) => Ok(code),
        Ok(Err(err)) => Err(runtime_failure(CauseChain::from_error(err.as_ref()))),
        Err(payload) => Err(runtime_failure(CauseChain::from_panic(payload.as_ref()))),
    }
}
