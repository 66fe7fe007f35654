//! Exclusive advisory file locks
//!
//! Clients serialize check-then-spawn on the spawn lock. A daemon holds the
//! daemon lock from before it writes its pid marker until it exits, so a
//! second daemon for the same project refuses to start even while the first
//! is still in its peer handshake and has no socket yet.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{DaemonError, Result};

/// An exclusive `flock` released on drop
#[derive(Debug)]
pub struct FileLock(File);

impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::flock(self.0.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
}

impl FileLock {
    /// Take the lock without waiting. `None` when another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(Self(file)));
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Ok(None)
        } else {
            Err(err.into())
        }
    }

    /// Wait for the lock on the blocking pool
    pub async fn acquire(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let file = open_lock_file(&path)?;
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            Ok(Self(file))
        })
        .await
        .map_err(|e| DaemonError::Io(std::io::Error::other(e)))?
    }
}

/// True while some process holds the lock at `path`
pub fn is_held(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    matches!(FileLock::try_acquire(path), Ok(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.lock");

        let held = FileLock::try_acquire(&path).unwrap().unwrap();
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
        assert!(is_held(&path));

        drop(held);
        assert!(!is_held(&path));
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_missing_lock_file_is_not_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.lock");
        assert!(!is_held(&path));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");

        let first = FileLock::acquire(&path).await.unwrap();
        let second = tokio::spawn({
            let path = path.clone();
            async move { FileLock::acquire(&path).await.map(|_| ()) }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished());

        drop(first);
        second.await.unwrap().unwrap();
    }
}
