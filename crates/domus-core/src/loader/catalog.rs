//! In-process modules registered by logical name.

use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;

use crate::context::ContextHandle;
use crate::error::{BoxError, CauseChain, Error, Result};

use super::{Module, ModuleResolver};

type RunFn = dyn Fn(&ContextHandle, &[String]) -> std::result::Result<i32, BoxError> + Send + Sync;

/// A module backed by a Rust closure.
pub struct FnModule {
    run: Box<RunFn>,
    accepts_parameters: bool,
}

impl FnModule {
    /// Module whose entry point receives the context's parameters.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ContextHandle, &[String]) -> std::result::Result<i32, BoxError> + Send + Sync + 'static,
    {
        Self {
            run: Box::new(f),
            accepts_parameters: true,
        }
    }

    /// Module whose entry point takes no parameters.
    pub fn parameterless<F>(f: F) -> Self
    where
        F: Fn(&ContextHandle) -> std::result::Result<i32, BoxError> + Send + Sync + 'static,
    {
        Self {
            run: Box::new(move |ctx, _| f(ctx)),
            accepts_parameters: false,
        }
    }
}

impl Module for FnModule {
    fn accepts_parameters(&self) -> bool {
        self.accepts_parameters
    }

    fn run(&self, context: &ContextHandle, parameters: &[String]) -> std::result::Result<i32, BoxError> {
        (self.run)(context, parameters)
    }
}

/// Registry of in-process modules, resolvable by name.
#[derive(Default)]
pub struct ModuleCatalog {
    modules: RwLock<FxHashMap<String, Arc<dyn Module>>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `name`, returning the module it replaced.
    pub fn register(&self, name: impl Into<String>, module: impl Module + 'static) -> Option<Arc<dyn Module>> {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(module))
    }

    /// Register a closure taking the context's parameters.
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F) -> Option<Arc<dyn Module>>
    where
        F: Fn(&ContextHandle, &[String]) -> std::result::Result<i32, BoxError> + Send + Sync + 'static,
    {
        self.register(name, FnModule::new(f))
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl ModuleResolver for ModuleCatalog {
    fn resolve(&self, module_ref: &str) -> Result<Arc<dyn Module>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module_ref)
            .cloned()
            .ok_or_else(|| Error::ModuleNotFound {
                module: module_ref.to_string(),
                causes: CauseChain::from_message(format!(
                    "no module named {} is registered",
                    module_ref
                )),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;

    fn handle() -> ContextHandle {
        ContextHandle::new(Arc::new(ExecutionContext::new("c", "m", Vec::new())))
    }

    #[test]
    fn test_register_and_resolve() {
        let catalog = ModuleCatalog::new();
        assert!(catalog.register_fn("greeter", |_, _| Ok(0)).is_none());
        assert!(catalog.contains("greeter"));

        let module = catalog.resolve("greeter").unwrap();
        assert!(module.accepts_parameters());
        assert_eq!(module.run(&handle(), &[]).unwrap(), 0);
    }

    #[test]
    fn test_missing_module_is_not_found() {
        let catalog = ModuleCatalog::new();
        let err = catalog.resolve("ghost").err().unwrap();
        assert!(matches!(err, Error::ModuleNotFound { .. }));
        assert!(err.is_load_failure());
    }

    #[test]
    fn test_replace_and_unregister() {
        let catalog = ModuleCatalog::new();
        catalog.register_fn("m", |_, _| Ok(1));
        assert!(catalog.register("m", FnModule::parameterless(|_| Ok(2))).is_some());

        let module = catalog.resolve("m").unwrap();
        assert!(!module.accepts_parameters());
        assert_eq!(module.run(&handle(), &["ignored".into()]).unwrap(), 2);

        assert!(catalog.unregister("m"));
        assert!(!catalog.unregister("m"));
        assert!(catalog.names().is_empty());
    }
}
