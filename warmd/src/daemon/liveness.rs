//! Liveness check and pid marker handling
//!
//! A daemon counts as running only when both its pid marker and its socket
//! file exist and the recorded process still accepts signal 0. Anything else
//! is either absent or stale. The check is best effort: the process can die
//! right after it, so callers still have to handle a refused connection.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use super::paths::DaemonPaths;

/// Read the pid recorded in a marker file
pub fn read_pid(path: &Path) -> Option<i32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse().ok().filter(|pid: &i32| *pid > 0)
}

/// Non-destructive existence check. Permission errors count as dead.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Pid of the live daemon for these paths, if any
pub fn running_pid(paths: &DaemonPaths) -> Option<i32> {
    if !paths.pid.exists() || !paths.socket.exists() {
        return None;
    }
    read_pid(&paths.pid).filter(|pid| process_alive(*pid))
}

/// Check if a daemon is running for these paths
pub fn is_running(paths: &DaemonPaths) -> bool {
    running_pid(paths).is_some()
}

/// Write the current process id to the marker, readable by the owner only
pub fn write_pid_marker(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pid that is very unlikely to belong to a live process
    const DEAD_PID: i32 = i32::MAX - 7;

    fn test_paths() -> (tempfile::TempDir, DaemonPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = DaemonPaths::new(dir.path(), Path::new("/work/project"));
        (dir, paths)
    }

    #[test]
    fn test_not_running_without_files() {
        let (_dir, paths) = test_paths();
        assert!(!is_running(&paths));
    }

    #[test]
    fn test_running_requires_socket_file() {
        let (_dir, paths) = test_paths();
        write_pid_marker(&paths.pid).unwrap();
        assert!(!is_running(&paths));

        std::fs::write(&paths.socket, b"").unwrap();
        assert_eq!(running_pid(&paths), Some(std::process::id() as i32));
    }

    #[test]
    fn test_stale_pid_is_not_running() {
        let (_dir, paths) = test_paths();
        std::fs::write(&paths.pid, DEAD_PID.to_string()).unwrap();
        std::fs::write(&paths.socket, b"").unwrap();
        assert!(!is_running(&paths));
    }

    #[test]
    fn test_garbage_pid_is_not_running() {
        let (_dir, paths) = test_paths();
        std::fs::write(&paths.pid, "not-a-pid").unwrap();
        std::fs::write(&paths.socket, b"").unwrap();
        assert!(!is_running(&paths));
        assert_eq!(read_pid(&paths.pid), None);
    }

    #[test]
    fn test_pid_marker_is_owner_only() {
        let (_dir, paths) = test_paths();
        write_pid_marker(&paths.pid).unwrap();
        let mode = std::fs::metadata(&paths.pid).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(read_pid(&paths.pid), Some(std::process::id() as i32));
    }

    #[test]
    fn test_remove_if_exists() {
        let (_dir, paths) = test_paths();
        remove_if_exists(&paths.socket).unwrap();
        std::fs::write(&paths.socket, b"").unwrap();
        remove_if_exists(&paths.socket).unwrap();
        assert!(!paths.socket.exists());
    }
}
