// Sentinel-file guards: a process-singleton lock and a per-operation
// in-progress marker. Both are plain files on disk rather than OS-level
// advisory locks, matching the deployment model of a single long-lived
// daemon process per store directory.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Held for the lifetime of the process. Unlike the system this design
/// is adapted from, the lock file is *not* removed as soon as it is
/// read back; removing it early let a second instance slip in during
/// a slow startup window, so it is removed only on clean shutdown via
/// `Drop`.
pub struct SingletonLock {
    path: PathBuf,
}

impl SingletonLock {
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join("netloom.lock");
        if path.exists() {
            return Err(EngineError::Io {
                operation: "singleton lock".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("another instance holds {}", path.display()),
                ),
            });
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(SingletonLock { path })
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Marks one polling/topology/curation cycle as in progress, so a crash
/// mid-cycle is visible to the operator (and to the next startup) as a
/// leftover marker rather than silent data loss.
pub struct OperationGuard {
    path: PathBuf,
}

impl OperationGuard {
    pub fn begin(dir: impl AsRef<Path>, operation: &str) -> Result<Self> {
        let path = dir.as_ref().join(format!("{operation}.inprogress"));
        std::fs::write(&path, chrono::Utc::now().to_rfc3339())?;
        Ok(OperationGuard { path })
    }

    pub fn finish(self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_singleton_lock_rejects_second_acquire() {
        let dir = tempdir().unwrap();
        let first = SingletonLock::acquire(dir.path()).unwrap();
        assert!(SingletonLock::acquire(dir.path()).is_err());
        drop(first);
        assert!(SingletonLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_operation_guard_leaves_marker_until_finished() {
        let dir = tempdir().unwrap();
        let guard = OperationGuard::begin(dir.path(), "poll").unwrap();
        let marker = dir.path().join("poll.inprogress");
        assert!(marker.exists());
        guard.finish().unwrap();
        assert!(!marker.exists());
    }
}
