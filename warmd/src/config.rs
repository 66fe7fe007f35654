//! Configuration loading
//!
//! Settings come from a TOML file. Search order:
//! 1. Explicit path (`--config` / `WARMD_CONFIG`)
//! 2. `.warmd.toml` in the project root or any parent directory
//! 3. Global config at `~/.config/warmd/config.toml`
//! 4. Built-in defaults

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::daemon::paths::absolute_project_path;
use crate::error::{DaemonError, Result};

/// Project-local config file name
pub const CONFIG_FILE_NAME: &str = ".warmd.toml";

/// Placeholder in peer arguments replaced with the project root
pub const PROJECT_PLACEHOLDER: &str = "{project}";

/// Daemon and client settings (from .warmd.toml)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding socket, pid marker, lock and log files
    pub runtime_dir: PathBuf,
    pub peer: PeerConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            runtime_dir: std::env::temp_dir(),
            peer: PeerConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Command line of the child tool server
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            command: "uvx".to_string(),
            args: [
                "--from",
                "git+https://github.com/oraios/serena",
                "serena",
                "start-mcp-server",
                "--context",
                "ide-assistant",
                "--project",
                PROJECT_PLACEHOLDER,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            env: HashMap::new(),
        }
    }
}

impl PeerConfig {
    /// Arguments with the project placeholder expanded
    pub fn expanded_args(&self, project_root: &Path) -> Vec<String> {
        let root = project_root.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(PROJECT_PLACEHOLDER, &root))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for a single peer request
    pub call_secs: u64,
    /// How long a client waits for a freshly spawned daemon
    pub startup_secs: u64,
    /// How long the server waits for a client to finish sending
    pub read_secs: u64,
    /// Time the peer gets to exit after SIGTERM before it is killed
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_secs: 120,
            startup_secs: 90,
            read_secs: 10,
            shutdown_grace_secs: 3,
        }
    }
}

impl TimeoutConfig {
    pub fn call(&self) -> Duration {
        Duration::from_secs(self.call_secs)
    }

    pub fn startup(&self) -> Duration {
        Duration::from_secs(self.startup_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Find a project config by walking up from `start`
fn find_project_config(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

/// The user's global config file, if present
fn global_config_file() -> Option<PathBuf> {
    let global = dirs::config_dir()?.join("warmd").join("config.toml");
    global.is_file().then_some(global)
}

impl Settings {
    /// Load settings for a project.
    ///
    /// An explicit path must exist and parse. Otherwise the nearest project
    /// `.warmd.toml` wins over the global config, except for `[peer]`: the
    /// command line that gets executed is only taken from the global config,
    /// so a checked-out repository cannot choose what runs.
    /// Discovered files that fail to parse are skipped with a warning.
    pub fn load(explicit: Option<&Path>, project_root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::debug!("Loading config from: {}", path.display());
            return Self::load_from_path(path);
        }

        let global = global_config_file().and_then(|path| Self::load_discovered(&path));
        let project = find_project_config(&absolute_project_path(project_root))
            .and_then(|path| Self::load_discovered(&path).map(|settings| (path, settings)));

        Ok(match (project, global) {
            (Some((path, mut settings)), global) => {
                let trusted_peer = global.map(|g| g.peer).unwrap_or_default();
                if declares_peer(&path) {
                    tracing::warn!(
                        "Ignoring [peer] in {}: only the global or an explicit config may set it",
                        path.display()
                    );
                }
                settings.peer = trusted_peer;
                settings
            }
            (None, Some(global)) => global,
            (None, None) => Self::default(),
        })
    }

    fn load_discovered(path: &Path) -> Option<Self> {
        match Self::load_from_path(path) {
            Ok(settings) => {
                tracing::debug!("Loaded config from {}", path.display());
                Some(settings)
            }
            Err(e) => {
                tracing::warn!("Ignoring config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DaemonError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| DaemonError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// True when the file at `path` has a `[peer]` table
fn declares_peer(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.parse::<toml::Table>().ok())
        .is_some_and(|table| table.contains_key("peer"))
}
