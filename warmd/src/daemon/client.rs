//! Client side of the control socket
//!
//! Used by short-lived CLI invocations: make sure a daemon exists for the
//! project (spawning a detached one if needed), then do a single
//! connect/send/receive/close exchange.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use super::liveness::{self, process_alive, remove_if_exists};
use super::lock::{self, FileLock};
use super::paths::{absolute_project_path, DaemonPaths};
use super::protocol::{DaemonRequest, ToolOutput, PONG};
use crate::config::Settings;
use crate::error::{DaemonError, Result};

/// Delay between readiness pings while a daemon starts
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Extra time granted on top of the call timeout when waiting for a response
const RESPONSE_SLACK: Duration = Duration::from_secs(10);

/// What `stop` found and did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live daemon; stale files (if any) were removed
    NotRunning,
    /// The daemon exited after SIGTERM
    Stopped { pid: i32 },
    /// The daemon ignored SIGTERM and was killed
    Killed { pid: i32 },
}

/// What `status` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    NotRunning,
    /// Process alive; `responsive` tells whether it answered a ping
    Running { pid: i32, responsive: bool },
}

/// Client for one project's daemon
pub struct DaemonClient {
    project_root: PathBuf,
    paths: DaemonPaths,
    settings: Settings,
    daemon_exe: PathBuf,
    config_path: Option<PathBuf>,
}

impl DaemonClient {
    /// Create a client that spawns the current executable as the daemon
    pub fn new(project_root: &Path, settings: Settings) -> Result<Self> {
        let project_root = absolute_project_path(project_root);
        let paths = DaemonPaths::new(&settings.runtime_dir, &project_root);
        Ok(Self {
            project_root,
            paths,
            settings,
            daemon_exe: std::env::current_exe()?,
            config_path: None,
        })
    }

    /// Use a different binary for `start`
    pub fn with_daemon_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.daemon_exe = exe.into();
        self
    }

    /// Config file forwarded to a spawned daemon
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    pub fn is_running(&self) -> bool {
        liveness::is_running(&self.paths)
    }

    /// Start a daemon unless one is already running, and wait until it answers
    pub async fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.settings.runtime_dir)?;
        let _lock = FileLock::acquire(&self.paths.lock).await?;

        // Someone else may have started it while we waited for the lock
        if self.is_running() {
            return Ok(());
        }

        // A daemon still in its peer handshake has no socket yet
        if lock::is_held(&self.paths.daemon_lock) {
            tracing::debug!("Daemon for {} is still starting", self.project_root.display());
            return self.wait_ready(None).await;
        }

        let child = self.spawn_detached()?;
        self.wait_ready(Some(child)).await
    }

    fn spawn_detached(&self) -> Result<std::process::Child> {
        tracing::debug!(
            "Spawning daemon for {} (log: {})",
            self.project_root.display(),
            self.paths.log.display()
        );

        let log = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.paths.log)?;

        let mut cmd = std::process::Command::new(&self.daemon_exe);
        if let Some(config) = &self.config_path {
            cmd.arg("--config").arg(absolute_project_path(config));
        }
        cmd.arg("start")
            .arg(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        // New session: the daemon must outlive the invoking shell's process group
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(cmd.spawn()?)
    }

    /// Poll until the daemon answers a ping, exits, or the deadline passes.
    ///
    /// Without a child (waiting on a daemon someone else spawned), exit is
    /// detected through the daemon lock being released.
    async fn wait_ready(&self, mut child: Option<std::process::Child>) -> Result<()> {
        let timeout = self.settings.timeouts.startup();
        let deadline = Instant::now() + timeout;

        let result = loop {
            let exited = match child.as_mut() {
                Some(child) => child.try_wait()?.map(|status| status.to_string()),
                None if !lock::is_held(&self.paths.daemon_lock) && !self.is_running() => {
                    Some("daemon lock released".to_string())
                }
                None => None,
            };
            if let Some(status) = exited {
                break Err(DaemonError::StartupFailed {
                    status,
                    log: self.paths.log.clone(),
                });
            }
            if self.paths.socket.exists() && self.ping().await.is_ok() {
                break Ok(());
            }
            if Instant::now() >= deadline {
                break Err(DaemonError::StartupTimeout {
                    timeout,
                    log: self.paths.log.clone(),
                });
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        };

        // Reap the daemon whenever it exits without holding up our own exit
        if let Some(mut child) = child {
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        result
    }

    /// One request/response exchange over the control socket
    pub async fn send(&self, request: &DaemonRequest) -> Result<ToolOutput> {
        let mut stream = match UnixStream::connect(&self.paths.socket).await {
            Ok(stream) => stream,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(DaemonError::ConnectionRefused)
            }
            Err(e) => return Err(e.into()),
        };

        stream.write_all(&request.to_vec()?).await?;
        stream.shutdown().await?;

        let wait = self.settings.timeouts.call() + RESPONSE_SLACK;
        let mut raw = Vec::new();
        tokio::time::timeout(wait, stream.read_to_end(&mut raw))
            .await
            .map_err(|_| DaemonError::Timeout {
                method: "daemon response".to_string(),
                timeout: wait,
            })??;

        Ok(decode_response(&raw))
    }

    /// Readiness check that never touches the peer
    pub async fn ping(&self) -> Result<()> {
        let output = self.send(&DaemonRequest::Ping).await?;
        if output.is_error || output.text != PONG {
            return Err(DaemonError::InvalidRequest(format!(
                "unexpected ping reply: {}",
                output.text
            )));
        }
        Ok(())
    }

    /// Call a tool on an already running daemon
    pub async fn call(&self, tool: &str, args: Value) -> Result<ToolOutput> {
        self.send(&DaemonRequest::call(tool, args)).await
    }

    /// Ensure a daemon is running, call a tool, and map the result to an exit code
    pub async fn ensure_and_call(&self, tool: &str, args: Value) -> Result<(String, i32)> {
        self.ensure_running().await?;
        let output = self.call(tool, args).await?;
        let code = output.exit_code();
        Ok((output.text, code))
    }

    pub async fn status(&self) -> DaemonStatus {
        match liveness::running_pid(&self.paths) {
            Some(pid) => DaemonStatus::Running {
                pid,
                responsive: self.ping().await.is_ok(),
            },
            None => DaemonStatus::NotRunning,
        }
    }

    /// Send SIGTERM to the daemon and wait for it to exit, then clear stale files
    pub async fn stop(&self) -> Result<StopOutcome> {
        let outcome = match liveness::read_pid(&self.paths.pid).filter(|pid| process_alive(*pid)) {
            None => StopOutcome::NotRunning,
            Some(pid) => {
                tracing::debug!("Sending SIGTERM to daemon (PID {})", pid);
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }

                let grace = self.settings.timeouts.shutdown_grace() + RESPONSE_SLACK;
                let deadline = Instant::now() + grace;
                while process_alive(pid) && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }

                if process_alive(pid) {
                    tracing::warn!("Daemon (PID {}) ignored SIGTERM, killing", pid);
                    unsafe {
                        libc::kill(pid, libc::SIGKILL);
                    }
                    StopOutcome::Killed { pid }
                } else {
                    StopOutcome::Stopped { pid }
                }
            }
        };

        for path in [&self.paths.socket, &self.paths.pid] {
            remove_if_exists(path)?;
        }
        Ok(outcome)
    }
}

/// Decode a daemon response; undecodable bytes are surfaced as an error text
fn decode_response(raw: &[u8]) -> ToolOutput {
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| ToolOutput::error(String::from_utf8_lossy(raw).into_owned()))
}
