use anyhow::Result;
use oom_trigger_cli::{Cli, Parser};

// Single-threaded: a worker must stay small under `ulimit -v`.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_tracing();
    cli.run().await
}
