//! Paths command handler

use std::path::Path;

use anyhow::Result;

use crate::config::Settings;
use crate::daemon::paths::absolute_project_path;
use crate::daemon::DaemonPaths;

/// Handle the `paths` command
pub fn run_paths(project: &Path, settings: Settings) -> Result<i32> {
    let project = absolute_project_path(project);
    let paths = DaemonPaths::new(&settings.runtime_dir, &project);

    println!("Project: {}", project.display());
    println!("  Id: {}", paths.id);
    println!("  Socket: {}", paths.socket.display());
    println!("  PID: {}", paths.pid.display());
    println!("  Log: {}", paths.log.display());
    Ok(0)
}
