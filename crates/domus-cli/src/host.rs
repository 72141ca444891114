//! Host command implementation for Domus CLI.
//!
//! Creates the contexts listed in a manifest and drives ticks from a timer
//! until the run duration elapses, every context has finished, or the user
//! interrupts.

use std::cell::OnceCell;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tokio::time::MissedTickBehavior;

use domus_core::{LoaderConfig, TickReport};
use domus_host::{HostBridge, TickDriver};

use crate::console::ConsoleEcho;
use crate::manifest::Manifest;

#[derive(Debug, Default)]
struct HostStats {
    ticks: u64,
    handler_calls: u64,
    failures: u64,
}

impl HostStats {
    fn record(&mut self, report: TickReport) {
        self.ticks += 1;
        self.handler_calls += report.handlers_invoked as u64;
        self.failures += report.failures as u64;
    }
}

/// Host the contexts of a manifest.
pub async fn execute(
    manifest_path: &Path,
    duration_ms: Option<u64>,
    tick_ms: Option<u64>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let manifest = Manifest::load(manifest_path)?;

    let tick_every = Duration::from_millis(tick_ms.unwrap_or(manifest.tick_interval_ms));
    if tick_every.is_zero() {
        anyhow::bail!("tick interval must be greater than zero");
    }
    let duration = duration_ms.or(manifest.duration_ms).map(Duration::from_millis);

    let base = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let mut config = LoaderConfig::from_env();
    let mut dirs = manifest.resolved_module_dirs(base);
    dirs.extend(config.module_dirs);
    config.module_dirs = dirs;

    let echo = Arc::new(ConsoleEcho::new());
    let bridge = HostBridge::from_config(&config, echo.clone());

    let slot = OnceCell::new();
    bridge.register_tick_sink(&|driver: &TickDriver| {
        let _ = slot.set(driver.clone());
    });
    let driver = slot.into_inner().context("tick sink was not attached")?;

    let created = manifest
        .contexts
        .iter()
        .filter(|spec| bridge.create(&spec.name, &spec.module, &spec.parameters))
        .count();
    println!(
        "Hosting {} of {} context(s), ticking every {}ms",
        created,
        manifest.contexts.len(),
        tick_every.as_millis()
    );

    let mut interval = tokio::time::interval(tick_every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = async move {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut stats = HostStats::default();
    let reason = loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(report) = driver.tick() {
                    stats.record(report);
                }
                if manifest.exit_when_idle && bridge.service().names().is_empty() {
                    break "all contexts finished";
                }
            }
            _ = &mut deadline => break "duration elapsed",
            _ = &mut ctrl_c => break "interrupted",
        }
    };
    println!("Stopping: {}", reason);

    let remaining = bridge.enumerate_contexts(
        &mut |name: &str, _: &()| println!("  unloading {}", name),
        &(),
    );
    drop(bridge);
    tracing::debug!("unloaded {} remaining context(s)", remaining);

    println!(
        "{} ticks, {} handler calls, {} failures in {:.2}s",
        stats.ticks,
        stats.handler_calls,
        stats.failures,
        start.elapsed().as_secs_f64()
    );

    if echo.count() > 0 {
        eprintln!("{} diagnostic line(s) reported", echo.count());
    }
    Ok(())
}
