//! Run command implementation for Domus CLI.
//!
//! Runs one module in its own context and waits until the context has been
//! torn down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use domus_core::{ContextState, LoaderConfig, RegistryService};

use crate::console::ConsoleEcho;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Execute a module.
pub async fn execute(
    module: &str,
    name: &str,
    module_dirs: Vec<PathBuf>,
    parameters: Vec<String>,
) -> anyhow::Result<()> {
    let start = Instant::now();

    // Directories given on the command line are searched first
    let mut config = LoaderConfig::from_env();
    let mut dirs = module_dirs;
    dirs.extend(config.module_dirs);
    config.module_dirs = dirs;

    let echo = Arc::new(ConsoleEcho::new());
    let service = RegistryService::from_config(&config, echo.clone());
    let context = service.create(name, module, parameters)?;
    tracing::debug!("started context {} for {}", name, module);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut interrupted = false;
    while context.state() != ContextState::Terminated {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c, if !interrupted => {
                eprintln!("Interrupted; unloading context {}", name);
                interrupted = true;
                // The context may have finished on its own in the meantime.
                let _ = service.unload(name);
            }
        }
    }

    let elapsed = start.elapsed();
    let diagnostics = echo.count();
    if diagnostics > 0 {
        anyhow::bail!(
            "context {} reported {} diagnostic line(s) in {:.2}s",
            name,
            diagnostics,
            elapsed.as_secs_f64()
        );
    }

    println!(
        "Context {} {} in {:.2}s",
        name,
        if interrupted { "unloaded" } else { "completed" },
        elapsed.as_secs_f64()
    );
    Ok(())
}
