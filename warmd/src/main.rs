use anyhow::Result;
use clap::Parser;

use warmd::cli::{Cli, Commands};
use warmd::handlers::run_command;
use warmd::init::{init_tracing, LogRole};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let role = match cli.command {
        Commands::Start { .. } => LogRole::Daemon,
        _ => LogRole::Client,
    };
    init_tracing(role, cli.verbose)?;

    let code = run_command(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
