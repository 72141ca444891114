//! Loader configuration.
//!
//! Module directories are searched, in order, when a module identifier is
//! not a path to an existing library:
//!
//! ```text
//! $DOMUS_MODULE_PATH entries   (platform path separator)
//! <exe dir>/modules/
//! <data local dir>/domus/modules/
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable holding extra module directories.
pub const MODULE_PATH_ENV: &str = "DOMUS_MODULE_PATH";

/// Configuration for [`Loader::from_config`](crate::Loader::from_config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directories searched for modules resolved by name.
    pub module_dirs: Vec<PathBuf>,
}

impl LoaderConfig {
    /// Configuration with no module directories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directories from the environment followed by the default directories.
    pub fn from_env() -> Self {
        let mut module_dirs = Self::env_module_dirs();
        for dir in Self::default_module_dirs() {
            if !module_dirs.contains(&dir) {
                module_dirs.push(dir);
            }
        }
        Self { module_dirs }
    }

    /// Append a module directory.
    pub fn with_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_dirs.push(dir.into());
        self
    }

    /// Entries of [`MODULE_PATH_ENV`], empty if it is unset.
    pub fn env_module_dirs() -> Vec<PathBuf> {
        std::env::var_os(MODULE_PATH_ENV)
            .map(|paths| {
                std::env::split_paths(&paths)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `modules/` next to the running executable, then the per-user module
    /// directory.
    pub fn default_module_dirs() -> Vec<PathBuf> {
        let mut found = Vec::new();

        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                found.push(exe_dir.join("modules"));
            }
        }

        if let Some(data_dir) = dirs::data_local_dir() {
            found.push(data_dir.join("domus").join("modules"));
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = LoaderConfig::new()
            .with_module_dir("/opt/domus/modules")
            .with_module_dir("mods");
        assert_eq!(
            config.module_dirs,
            vec![PathBuf::from("/opt/domus/modules"), PathBuf::from("mods")]
        );
    }

    #[test]
    fn test_defaults_include_exe_modules_dir() {
        let dirs = LoaderConfig::default_module_dirs();
        assert!(dirs.iter().any(|d| d.ends_with("modules")));
    }

    #[test]
    fn test_from_env_has_no_duplicates() {
        let config = LoaderConfig::from_env();
        let mut deduped = config.module_dirs.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), config.module_dirs.len());
    }
}
