//! Daemon start/stop/status command handlers

use std::path::Path;

use anyhow::Result;

use crate::config::Settings;
use crate::daemon::{Daemon, DaemonClient, DaemonStatus, StopOutcome};

/// Handle the `start` command: run the daemon in the foreground
pub async fn run_start(project: &Path, settings: Settings) -> Result<i32> {
    let daemon = Daemon::new(project, settings);
    tracing::info!("Socket: {}", daemon.paths().socket.display());
    daemon.run().await?;
    Ok(0)
}

/// Handle the `stop` command
pub async fn run_stop(project: &Path, settings: Settings) -> Result<i32> {
    let client = DaemonClient::new(project, settings)?;
    match client.stop().await? {
        StopOutcome::NotRunning => println!("Daemon is not running."),
        StopOutcome::Stopped { pid } => println!("Daemon stopped (PID {}).", pid),
        StopOutcome::Killed { pid } => {
            println!("Daemon (PID {}) did not exit in time and was killed.", pid)
        }
    }
    Ok(0)
}

/// Handle the `status` command
pub async fn run_status(project: &Path, settings: Settings) -> Result<i32> {
    let client = DaemonClient::new(project, settings)?;
    let paths = client.paths();

    match client.status().await {
        DaemonStatus::Running { pid, responsive } => {
            println!("Daemon is running.");
            println!("  PID: {}", pid);
            println!("  Socket: {}", paths.socket.display());
            if !responsive {
                println!("  Warning: not accepting connections. Try: warmd stop, then retry.");
            }
        }
        DaemonStatus::NotRunning => {
            println!("Daemon is not running.");
            println!("  Socket: {}", paths.socket.display());
        }
    }
    Ok(0)
}
