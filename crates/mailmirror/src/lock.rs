//! Directory-based mutual exclusion.
//!
//! The exclusion token is a `lock/` subdirectory: `mkdir` is atomic on every
//! platform we care about, so whoever creates it owns the target directory.
//! The guard removes it again on drop, normal or panicking exit alike.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Name of the lock subdirectory.
const LOCK_DIR: &str = "lock";

/// Held lock on a target directory.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    /// Acquires the lock inside `dir`.
    ///
    /// # Errors
    ///
    /// Fails when another instance holds the lock or the directory cannot
    /// be created.
    pub fn acquire(dir: &Path) -> io::Result<Self> {
        let path = dir.join(LOCK_DIR);
        match fs::create_dir(&path) {
            Ok(()) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "lock directory {} exists; another instance is running",
                    path.display()
                ),
            )),
            Err(e) => Err(e),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(&self.path) {
            warn!(path = %self.path.display(), error = %e, "cannot release lock");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(dir.path().join("lock").exists());

        drop(lock);
        assert!(!dir.path().join("lock").exists());
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();

        let _lock = DirLock::acquire(dir.path()).unwrap();
        let err = DirLock::acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = tempfile::tempdir().unwrap();

        drop(DirLock::acquire(dir.path()).unwrap());
        assert!(DirLock::acquire(dir.path()).is_ok());
    }
}
