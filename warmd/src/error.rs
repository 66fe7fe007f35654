//! Error types for the daemon, the peer channel and the client connector

use std::path::PathBuf;
use std::time::Duration;

/// Error type for daemon operations
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Filesystem or socket I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be serialized or deserialized
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The peer process could not be started
    #[error("failed to spawn peer `{command}`: {source}")]
    PeerSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer's output stream ended or its input stream is gone
    #[error("peer process closed its streams")]
    PeerClosed,

    /// A peer request got no reply in time
    #[error("peer request `{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The initialize exchange with the peer failed
    #[error("peer handshake failed: {0}")]
    Handshake(String),

    /// A tool call was issued before the handshake completed
    #[error("peer is not ready: handshake has not completed")]
    NotReady,

    /// A client sent a request the server cannot act on
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The control socket exists but nothing accepts on it
    #[error("daemon not accepting connections. Try: warmd stop <project>, then retry.")]
    ConnectionRefused,

    /// The spawned daemon never created its socket
    #[error("daemon failed to start within {timeout:?}. Check log: {}", log.display())]
    StartupTimeout { timeout: Duration, log: PathBuf },

    /// The spawned daemon exited before becoming ready
    #[error("daemon exited during startup ({status}). Check log: {}", log.display())]
    StartupFailed { status: String, log: PathBuf },

    /// Another live daemon owns this project
    #[error("a daemon is already running for this project (PID {pid})")]
    AlreadyRunning { pid: i32 },

    /// Configuration could not be loaded
    #[error("config error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;
