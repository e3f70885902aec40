//! Durable UID checkpoint.
//!
//! The checkpoint is the UID of the last message fully handed to the sink,
//! stored as decimal ASCII plus newline. Writes go to a sibling temp file
//! which is fsynced and renamed over the real one, so a crash leaves either
//! the old or the new value, never a torn file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// Name of the checkpoint file inside the target directory.
const CHECKPOINT_FILE: &str = "lastuid";

/// Name of the rename-source temp file.
const CHECKPOINT_TEMP: &str = "lastuid.new";

/// Atomic persistence for the last delivered UID.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
    temp_path: PathBuf,
}

impl Checkpoint {
    /// Creates a checkpoint rooted in `dir`.
    #[must_use]
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CHECKPOINT_FILE),
            temp_path: dir.join(CHECKPOINT_TEMP),
        }
    }

    /// Loads the persisted UID.
    ///
    /// A missing file or non-numeric contents mean "no prior state" and read
    /// as 0; trailing whitespace is tolerated.
    #[must_use]
    pub fn load(&self) -> u32 {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read checkpoint, assuming 0");
                return 0;
            }
        };

        match contents.trim().parse() {
            Ok(uid) => uid,
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    contents = contents.trim(),
                    "malformed checkpoint, assuming 0"
                );
                0
            }
        }
    }

    /// Durably stores `uid` with write-then-rename.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; the previous checkpoint stays
    /// intact in that case.
    pub fn store(&self, uid: u32) -> io::Result<()> {
        let mut file = fs::File::create(&self.temp_path)?;
        file.write_all(format!("{uid}\n").as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.temp_path, &self.path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Checkpoint::new(dir.path()).load(), 0);
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::new(dir.path());
        cp.store(42).unwrap();
        assert_eq!(cp.load(), 42);
        assert_eq!(fs::read_to_string(dir.path().join("lastuid")).unwrap(), "42\n");
    }

    #[test]
    fn test_store_overwrites_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Checkpoint::new(dir.path());
        cp.store(10).unwrap();
        cp.store(11).unwrap();
        cp.store(12).unwrap();
        assert_eq!(cp.load(), 12);
        // The rename source does not linger.
        assert!(!dir.path().join("lastuid.new").exists());
    }

    #[test]
    fn test_malformed_contents_read_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lastuid"), "foo\n").unwrap();
        assert_eq!(Checkpoint::new(dir.path()).load(), 0);
    }

    #[test]
    fn test_trailing_whitespace_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lastuid"), "7 \n\n").unwrap();
        assert_eq!(Checkpoint::new(dir.path()).load(), 7);
    }
}
