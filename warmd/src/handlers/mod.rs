//! Command handlers
//!
//! One function per subcommand. Handlers return the process exit code;
//! anything they cannot handle is an `anyhow` error reported by `main`.

mod call;
mod daemon;
mod logs;
mod paths;

use anyhow::Result;

use crate::cli::{Cli, Commands};
use crate::config::Settings;

pub use call::run_call;
pub use daemon::{run_start, run_status, run_stop};
pub use logs::run_logs;
pub use paths::run_paths;

/// Dispatch a parsed command line to its handler
pub async fn run_command(cli: Cli) -> Result<i32> {
    let config = cli.config;
    let load = |project: &std::path::Path| Settings::load(config.as_deref(), project);

    match cli.command {
        Commands::Start { project } => run_start(&project, load(&project)?).await,
        Commands::Call {
            project,
            tool,
            args,
        } => run_call(&project, load(&project)?, config.clone(), &tool, &args).await,
        Commands::Stop { project } => run_stop(&project, load(&project)?).await,
        Commands::Status { project } => run_status(&project, load(&project)?).await,
        Commands::Logs { project, lines } => run_logs(&project, load(&project)?, lines).await,
        Commands::Paths { project } => run_paths(&project, load(&project)?),
    }
}
