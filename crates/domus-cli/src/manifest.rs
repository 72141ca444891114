//! Host manifest.
//!
//! ```json
//! {
//!   "tick_interval_ms": 16,
//!   "duration_ms": 5000,
//!   "exit_when_idle": true,
//!   "module_dirs": ["modules"],
//!   "contexts": [
//!     { "name": "overlay", "module": "overlay", "parameters": "--x 1 --title \"main\"" }
//!   ]
//! }
//! ```
//!
//! Relative module directories are resolved against the manifest's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

fn default_tick_interval_ms() -> u64 {
    16
}

fn default_true() -> bool {
    true
}

/// One context to create at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSpec {
    pub name: String,
    pub module: String,
    /// Parameter string, split with Windows command-line rules.
    #[serde(default)]
    pub parameters: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Stop after this long. Runs until interrupted if absent.
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Stop once no context is left.
    #[serde(default = "default_true")]
    pub exit_when_idle: bool,
    #[serde(default)]
    pub module_dirs: Vec<PathBuf>,
    pub contexts: Vec<ContextSpec>,
}

impl Manifest {
    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(domus_core::Error::from)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&text)
            .with_context(|| format!("invalid manifest {}", path.display()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> domus_core::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(domus_core::Error::Config(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for spec in &self.contexts {
            if spec.name.is_empty() {
                return Err(domus_core::Error::Config(
                    "context names must not be empty".to_string(),
                ));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(domus_core::Error::Config(format!(
                    "context {} is listed more than once",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Module directories with relative entries joined onto `base`.
    pub fn resolved_module_dirs(&self, base: &Path) -> Vec<PathBuf> {
        self.module_dirs
            .iter()
            .map(|dir| {
                if dir.is_relative() {
                    base.join(dir)
                } else {
                    dir.clone()
                }
            })
            .collect()
    }
}
