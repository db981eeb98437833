//! OOM trigger CLI library

// Re-export CLI types for testing
pub use clap::{Parser, Subcommand};

use anyhow::{Context, Result};
use oom_trigger_core::{run_worker_process, Orchestrator, SelfExecLauncher, TriggerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oom-trigger")]
#[command(about = "Spawn workers that allocate memory until the system runs out")]
#[command(version, author, long_about = None)]
pub struct Cli {
    /// Enable debug logging (forwarded to workers)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as a single worker process (used internally by the orchestrator)
    #[command(name = "worker", hide = true)]
    Worker,
}

impl Cli {
    /// Install the tracing subscriber. `RUST_LOG` takes precedence over `--debug`.
    pub fn init_tracing(&self) {
        let default_level = if self.debug { "debug" } else { "info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Run the role selected on the command line.
    pub async fn run(self) -> Result<()> {
        let config = TriggerConfig::default();
        match self.command {
            Some(Commands::Worker) => {
                run_worker_process(&config).await;
                Ok(())
            }
            None => {
                let launcher = SelfExecLauncher::current(self.debug)
                    .context("Failed to locate the current executable")?;
                let orchestrator = Orchestrator::new(config, launcher);
                let summary = orchestrator
                    .run()
                    .await
                    .context("OOM trigger orchestration failed")?;
                info!(
                    spawned = summary.spawned,
                    exited = summary.exited,
                    signaled = summary.signaled,
                    unknown = summary.unknown,
                    "OOM trigger finished"
                );
                Ok(())
            }
        }
    }
}
