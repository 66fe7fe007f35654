//! Logs command handler

use std::path::Path;

use anyhow::Result;

use crate::config::Settings;
use crate::daemon::DaemonPaths;

/// Last `lines` lines of `content` (all of them for 0)
fn tail(content: &str, lines: usize) -> Vec<&str> {
    let all: Vec<&str> = content.lines().collect();
    if lines == 0 {
        return all;
    }
    let start = all.len().saturating_sub(lines);
    all[start..].to_vec()
}

/// Handle the `logs` command
pub async fn run_logs(project: &Path, settings: Settings, lines: usize) -> Result<i32> {
    let paths = DaemonPaths::new(&settings.runtime_dir, project);

    if !paths.log.exists() {
        println!("No daemon log found.");
        println!("Expected location: {}", paths.log.display());
        return Ok(0);
    }

    println!("=== Daemon log ({}) ===\n", paths.log.display());
    let bytes = tokio::fs::read(&paths.log).await?;
    let content = String::from_utf8_lossy(&bytes);
    for line in tail(&content, lines) {
        println!("{}", line);
    }
    Ok(0)
}
