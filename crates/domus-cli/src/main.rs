//! Domus CLI - Run and host isolated execution contexts.

mod console;
mod host;
mod manifest;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "domus")]
#[command(about = "Run and host isolated execution contexts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one module in a context and wait for it to finish
    Run {
        /// Path to a module library, or a module name
        module: String,

        /// Context name
        #[arg(long, default_value = "main")]
        name: String,

        /// Extra directory searched for modules by name (repeatable)
        #[arg(long = "module-dir")]
        module_dirs: Vec<PathBuf>,

        /// Parameters passed to the module
        #[arg(last = true)]
        parameters: Vec<String>,
    },

    /// Host the contexts listed in a manifest and drive ticks
    Host {
        /// Path to the manifest (.json)
        manifest: PathBuf,

        /// Override the manifest's run duration, in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Override the manifest's tick interval, in milliseconds
        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Print how a parameter string is split into arguments
    Split {
        /// Parameter string
        blob: String,
    },

    /// Print the directories searched for modules by name
    Paths,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format domus-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(domus_err) = err.downcast_ref::<domus_core::Error>() {
            // Keep any context the command attached.
            let outer = err.to_string();
            if outer == domus_err.to_string() {
                anyhow::anyhow!("{}", domus_err.with_hint())
            } else {
                anyhow::anyhow!("{}: {}", outer, domus_err.with_hint())
            }
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run {
            module,
            name,
            module_dirs,
            parameters,
        } => {
            run::execute(&module, &name, module_dirs, parameters)
                .await
                .map_err(format_error)?;
        }

        Commands::Host {
            manifest,
            duration_ms,
            tick_ms,
        } => {
            host::execute(&manifest, duration_ms, tick_ms)
                .await
                .map_err(format_error)?;
        }

        Commands::Split { blob } => {
            for arg in domus_host::split_command_line(&blob)? {
                println!("{}", arg);
            }
        }

        Commands::Paths => {
            for dir in domus_core::LoaderConfig::from_env().module_dirs {
                println!("{}", dir.display());
            }
        }
    }

    Ok(())
}
