//! Error types for domus-core.

use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Result type for domus-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by modules, tick handlers and teardown hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Maximum number of nested causes kept below the outer failure.
pub const MAX_NESTED_CAUSES: usize = 10;

/// Bounded chain of failure causes, captured where the failure was caught.
///
/// The first entry is the outer failure; up to [`MAX_NESTED_CAUSES`] nested
/// causes follow, outermost first. Deeper causes are dropped and the chain is
/// marked as truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CauseChain {
    causes: Vec<String>,
    truncated: bool,
}

impl CauseChain {
    /// Capture a chain by walking `source()` from `err`.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = vec![err.to_string()];
        let mut truncated = false;
        let mut source = err.source();

        while let Some(cause) = source {
            if causes.len() > MAX_NESTED_CAUSES {
                truncated = true;
                break;
            }
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self { causes, truncated }
    }

    /// A chain with a single message and no nested causes.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            causes: vec![message.into()],
            truncated: false,
        }
    }

    /// Capture a chain from a panic payload returned by `catch_unwind`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::from_message(format!("panicked: {}", message))
    }

    /// The outer failure message.
    pub fn outer(&self) -> &str {
        self.causes.first().map(String::as_str).unwrap_or_default()
    }

    /// Nested causes, outermost first.
    pub fn nested(&self) -> &[String] {
        self.causes.get(1..).unwrap_or_default()
    }

    /// Whether causes beyond the bound were dropped.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Render the chain as echo lines, the outer failure prefixed by `label`.
    pub fn report_lines(&self, label: &str) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.causes.len() + 1);
        lines.push(format!("{}: {}", label, self.outer()));
        for (i, cause) in self.nested().iter().enumerate() {
            lines.push(format!("Inner cause[{}]: {}", i + 1, cause));
        }
        if self.truncated {
            lines.push(format!(
                "(further causes omitted after {} nested causes)",
                MAX_NESTED_CAUSES
            ));
        }
        lines
    }
}

impl fmt::Display for CauseChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.outer())?;
        if !self.nested().is_empty() {
            write!(f, " ({} nested causes)", self.nested().len())?;
        }
        Ok(())
    }
}

/// Errors that can occur in domus-core.
#[derive(Debug, Error)]
pub enum Error {
    /// A live context already uses this name.
    #[error("context already exists: {0}")]
    NameConflict(String),

    /// No live context has this name.
    #[error("context not found: {0}")]
    ContextNotFound(String),

    /// The module identifier could not be resolved.
    #[error("module not found: {module}: {causes}")]
    ModuleNotFound { module: String, causes: CauseChain },

    /// The module was found but could not be loaded.
    #[error("failed to load module {module}: {causes}")]
    ModuleLoadFailed { module: String, causes: CauseChain },

    /// Both the primary and the fallback resolution failed.
    #[error("module {module} could not be loaded by path or by name: {secondary}")]
    ModuleUnavailable {
        module: String,
        primary: CauseChain,
        secondary: CauseChain,
    },

    /// The module failed while running.
    #[error("module failed in context {context}: {causes}")]
    RuntimeFailure { context: String, causes: CauseChain },

    /// Releasing a context's resources failed.
    #[error("teardown failed for context {context}: {causes}")]
    TeardownFailure { context: String, causes: CauseChain },

    /// The OS refused to start a thread for a context.
    #[error("failed to spawn thread for context {context}: {source}")]
    Spawn {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Parameters could not be prepared for a module.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this is a load-class failure that the fallback strategy may retry.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Error::ModuleNotFound { .. } | Error::ModuleLoadFailed { .. }
        )
    }

    /// The cause chain carried by this error, or one built from its message.
    pub fn cause_chain(&self) -> CauseChain {
        match self {
            Error::ModuleNotFound { causes, .. }
            | Error::ModuleLoadFailed { causes, .. }
            | Error::RuntimeFailure { causes, .. }
            | Error::TeardownFailure { causes, .. } => causes.clone(),
            Error::ModuleUnavailable { secondary, .. } => secondary.clone(),
            other => CauseChain::from_error(other),
        }
    }

    /// Render the chained report written to the echo channel.
    pub fn report_lines(&self) -> Vec<String> {
        match self {
            Error::ModuleUnavailable {
                module,
                primary,
                secondary,
            } => {
                let mut lines = primary.report_lines(&format!("Failure[1] executing module {}", module));
                lines.extend(secondary.report_lines(&format!("Failure[2] executing module {}", module)));
                lines
            }
            Error::RuntimeFailure { context, causes } => {
                let mut lines = vec![format!("Unhandled failure in context {}.", context)];
                lines.extend(causes.report_lines("Outer failure"));
                lines
            }
            Error::TeardownFailure { context, causes } => {
                causes.report_lines(&format!("Failure tearing down context {}", context))
            }
            Error::ModuleNotFound { module, causes } => {
                causes.report_lines(&format!("Module {} not found", module))
            }
            Error::ModuleLoadFailed { module, causes } => {
                causes.report_lines(&format!("Module {} failed to load", module))
            }
            other => CauseChain::from_error(other).report_lines("Failure"),
        }
    }

    /// Format the error with a recovery hint, for command-line output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::NameConflict(_) => {
                Some("choose another context name, or unload the running context first")
            }
            Error::ModuleNotFound { .. } | Error::ModuleUnavailable { .. } => Some(
                "check the module path, or add its directory to DOMUS_MODULE_PATH so it can be found by name",
            ),
            Error::ModuleLoadFailed { .. } => Some(
                "make sure the library exports domus_module_main or domus_module_start and was built for this platform",
            ),
            Error::Io(_) => Some("check that the file exists and is readable"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Layer {
        depth: usize,
        inner: Option<Box<Layer>>,
    }

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "layer {}", self.depth)
        }
    }

    impl std::error::Error for Layer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.inner.as_deref().map(|e| e as _)
        }
    }

    fn nested(depth: usize) -> Layer {
        let mut err = Layer { depth, inner: None };
        for d in (0..depth).rev() {
            err = Layer {
                depth: d,
                inner: Some(Box::new(err)),
            };
        }
        err
    }

    #[test]
    fn test_chain_walks_sources() {
        let chain = CauseChain::from_error(&nested(2));
        assert_eq!(chain.outer(), "layer 0");
        assert_eq!(chain.nested(), &["layer 1".to_string(), "layer 2".to_string()]);
        assert!(!chain.is_truncated());
    }

    #[test]
    fn test_chain_is_bounded() {
        let chain = CauseChain::from_error(&nested(25));
        assert_eq!(chain.nested().len(), MAX_NESTED_CAUSES);
        assert!(chain.is_truncated());

        let lines = chain.report_lines("Outer failure");
        assert_eq!(lines[0], "Outer failure: layer 0");
        assert_eq!(lines[10], "Inner cause[10]: layer 10");
        assert!(lines.last().unwrap().contains("omitted"));
    }

    #[test]
    fn test_chain_from_panic_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let chain = CauseChain::from_panic(payload.as_ref());
        assert_eq!(chain.outer(), "panicked: boom");
    }

    #[test]
    fn test_load_failure_classification() {
        let not_found = Error::ModuleNotFound {
            module: "m".into(),
            causes: CauseChain::from_message("missing"),
        };
        let runtime = Error::RuntimeFailure {
            context: "a".into(),
            causes: CauseChain::from_message("fault"),
        };
        assert!(not_found.is_load_failure());
        assert!(!runtime.is_load_failure());
        assert!(!Error::NameConflict("a".into()).is_load_failure());
    }

    #[test]
    fn test_unavailable_report_keeps_both_chains() {
        let err = Error::ModuleUnavailable {
            module: "tool".into(),
            primary: CauseChain::from_message("no file at tool"),
            secondary: CauseChain::from_message("not in search path"),
        };
        let lines = err.report_lines();
        assert_eq!(lines[0], "Failure[1] executing module tool: no file at tool");
        assert_eq!(lines[1], "Failure[2] executing module tool: not in search path");
    }

    #[test]
    fn test_with_hint() {
        let hinted = Error::NameConflict("a".into()).with_hint();
        assert!(hinted.starts_with("context already exists: a"));
        assert!(hinted.contains("hint:"));

        let plain = Error::Config("bad".into()).with_hint();
        assert!(!plain.contains("hint:"));
    }
}
