//! CLI argument definitions
//!
//! Contains the main CLI struct and Commands enum for clap parsing.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "warmd")]
#[command(about = "Keep an MCP tool server warm per project behind a Unix socket")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: .warmd.toml in the project, then the user config dir)
    #[arg(long, env = "WARMD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace). Default is info.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon for a project in the foreground
    Start {
        /// Project root
        project: PathBuf,
    },
    /// Call a tool, starting the daemon if needed
    Call {
        /// Project root
        project: PathBuf,
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Stop the daemon for a project
    Stop {
        /// Project root
        project: PathBuf,
    },
    /// Show whether the daemon for a project is running
    Status {
        /// Project root
        project: PathBuf,
    },
    /// View daemon logs
    Logs {
        /// Project root
        project: PathBuf,
        /// Number of lines to show (0 = all)
        #[arg(long, short, default_value = "50")]
        lines: usize,
    },
    /// Print the socket, pid and log paths for a project
    Paths {
        /// Project root
        project: PathBuf,
    },
}
