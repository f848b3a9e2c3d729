//! Single-instance lock on the backup root.
//!
//! Two concurrent runs against the same root would race on the snapshot
//! directory and the `latest` pointer, so every run holds an exclusive
//! advisory lock for its whole duration.

use crate::{BackupError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file name at the backup root. Not a snapshot name, so retention
/// never touches it.
pub const LOCK_FILE: &str = ".pull-backup.lock";

/// Held for the lifetime of a run; released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock or fail immediately with [`BackupError::Locked`].
    pub fn acquire(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        file.try_lock_exclusive()
            .map_err(|_| BackupError::Locked(root.to_path_buf()))?;

        debug!(lock = %path.display(), "Run lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), "Failed to release run lock: {}", e);
        }
    }
}
