//! Project identity and the well-known files derived from it
//!
//! Every project root maps to a short hash. Socket, pid marker, log and both
//! lock files live side by side in the runtime directory under that hash, so
//! the daemon and any client agree on them without talking first.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

/// Length of the hex identity token
const IDENTITY_LEN: usize = 12;

/// File name prefix for every derived path
const FILE_PREFIX: &str = "warmd";

/// Absolute, normalized form of a project path.
///
/// Trailing separators, `.` and `..` are resolved lexically. Symlinks are
/// not resolved, so a link and its target still yield different identities.
pub fn absolute_project_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Deterministic short identifier for an absolute project path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn from_path(path: &Path) -> Self {
        let absolute = absolute_project_path(path);
        let digest = Sha256::digest(absolute.as_os_str().as_encoded_bytes());
        let mut hex = format!("{:x}", digest);
        hex.truncate(IDENTITY_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The files shared by the daemon and its clients for one project
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub id: ProjectId,
    pub socket: PathBuf,
    pub pid: PathBuf,
    pub log: PathBuf,
    /// Spawn lock taken by clients around check-then-spawn
    pub lock: PathBuf,
    /// Held by a daemon for its whole lifetime
    pub daemon_lock: PathBuf,
}

impl DaemonPaths {
    pub fn new(runtime_dir: &Path, project: &Path) -> Self {
        let id = ProjectId::from_path(project);
        let file = |ext: &str| runtime_dir.join(format!("{}-{}.{}", FILE_PREFIX, id, ext));
        Self {
            socket: file("sock"),
            pid: file("pid"),
            log: file("log"),
            lock: file("lock"),
            daemon_lock: file("daemon.lock"),
            id,
        }
    }
}
