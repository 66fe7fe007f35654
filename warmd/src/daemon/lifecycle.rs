//! Daemon lifecycle: startup, serving and teardown
//!
//! Startup writes the pid marker, brings up the peer and binds the control
//! socket. Every exit path (signal, peer death, startup failure, unwinding)
//! ends in the same `RuntimeFiles` cleanup so no marker or socket survives
//! the process under normal termination.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};

use super::liveness::{self, remove_if_exists};
use super::lock::FileLock;
use super::paths::{absolute_project_path, DaemonPaths};
use super::server::SocketServer;
use crate::config::Settings;
use crate::error::{DaemonError, Result};
use crate::peer::{PeerChannel, ToolInvoker};

/// Lifecycle state of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Marker written, peer starting
    Starting,
    /// Peer handshake done
    Ready,
    /// Socket bound, accepting clients
    Serving,
    /// Tearing down
    Stopping,
    /// All resources released
    Stopped,
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonState::Starting => write!(f, "starting"),
            DaemonState::Ready => write!(f, "ready"),
            DaemonState::Serving => write!(f, "serving"),
            DaemonState::Stopping => write!(f, "stopping"),
            DaemonState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Pid marker and socket file owned by this process.
///
/// The socket is tracked only once this process has bound it, so a failed
/// bind never removes another daemon's socket. Removed exactly once, either
/// explicitly or on drop.
struct RuntimeFiles {
    pid: PathBuf,
    socket: Option<PathBuf>,
    removed: AtomicBool,
}

impl RuntimeFiles {
    fn new(pid: &Path) -> Self {
        Self {
            pid: pid.to_path_buf(),
            socket: None,
            removed: AtomicBool::new(false),
        }
    }

    fn track_socket(&mut self, socket: &Path) {
        self.socket = Some(socket.to_path_buf());
    }

    fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        for path in self.socket.iter().chain(std::iter::once(&self.pid)) {
            if let Err(e) = remove_if_exists(path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

impl Drop for RuntimeFiles {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Bind the control socket, readable and writable by the owner only
fn bind_socket(path: &Path) -> Result<UnixListener> {
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

/// The per-project daemon
pub struct Daemon {
    project_root: PathBuf,
    paths: DaemonPaths,
    settings: Settings,
    state: DaemonState,
}

impl Daemon {
    pub fn new(project_root: &Path, settings: Settings) -> Self {
        let project_root = absolute_project_path(project_root);
        let paths = DaemonPaths::new(&settings.runtime_dir, &project_root);
        Self {
            project_root,
            paths,
            settings,
            state: DaemonState::Starting,
        }
    }

    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    fn transition(&mut self, next: DaemonState) {
        tracing::info!("Daemon state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run until a termination signal arrives or the peer goes away.
    ///
    /// Losing the peer is an abnormal stop and is returned as `PeerClosed`
    /// after the same teardown a signal gets.
    pub async fn run(mut self) -> Result<()> {
        // Register handlers first so an early SIGTERM still goes through teardown
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tracing::info!(
            "Starting daemon for {} (id {})",
            self.project_root.display(),
            self.paths.id
        );

        std::fs::create_dir_all(&self.settings.runtime_dir)?;

        // Held until this function returns
        let _instance = match FileLock::try_acquire(&self.paths.daemon_lock)? {
            Some(lock) => lock,
            None => {
                let pid = liveness::read_pid(&self.paths.pid).unwrap_or_default();
                return Err(DaemonError::AlreadyRunning { pid });
            }
        };

        if self.paths.socket.exists() {
            tracing::info!("Removing stale socket {}", self.paths.socket.display());
            remove_if_exists(&self.paths.socket)?;
        }

        liveness::write_pid_marker(&self.paths.pid)?;
        let mut files = RuntimeFiles::new(&self.paths.pid);

        let timeouts = self.settings.timeouts.clone();
        let channel = Arc::new(PeerChannel::spawn(
            &self.settings.peer,
            &self.project_root,
            timeouts.call(),
        )?);

        let handshake = tokio::select! {
            result = channel.initialize() => result.map(|_| ()),
            _ = sigterm.recv() => Err(DaemonError::Handshake("interrupted by SIGTERM".into())),
            _ = sigint.recv() => Err(DaemonError::Handshake("interrupted by SIGINT".into())),
        };
        if let Err(e) = handshake {
            tracing::error!("Peer handshake failed: {}", e);
            self.transition(DaemonState::Stopping);
            channel.shutdown(timeouts.shutdown_grace()).await;
            files.remove();
            self.transition(DaemonState::Stopped);
            return Err(e);
        }
        self.transition(DaemonState::Ready);

        let listener = match bind_socket(&self.paths.socket) {
            Ok(listener) => listener,
            Err(e) => {
                self.transition(DaemonState::Stopping);
                channel.shutdown(timeouts.shutdown_grace()).await;
                files.remove();
                self.transition(DaemonState::Stopped);
                return Err(e);
            }
        };
        files.track_socket(&self.paths.socket);
        tracing::info!(
            "Listening on {} (peer PID {:?})",
            self.paths.socket.display(),
            channel.pid()
        );
        self.transition(DaemonState::Serving);

        let invoker = Arc::new(ToolInvoker::new(channel.clone()));
        let server = SocketServer::new(invoker, timeouts.read());
        let peer_closed = channel.clone();
        let peer_died = server
            .serve(listener, async move {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, shutting down");
                        false
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT, shutting down");
                        false
                    }
                    _ = peer_closed.closed() => {
                        tracing::error!("Peer exited, shutting down");
                        true
                    }
                }
            })
            .await;

        self.transition(DaemonState::Stopping);
        channel.shutdown(timeouts.shutdown_grace()).await;
        files.remove();
        self.transition(DaemonState::Stopped);

        if peer_died {
            return Err(DaemonError::PeerClosed);
        }
        Ok(())
    }
}
