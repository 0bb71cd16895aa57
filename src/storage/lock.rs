//! Mutual exclusion between rotation and backup snapshots
//!
//! A backup must observe a non-rotating topology. Both operations take an
//! exclusive advisory lock on `<appData>/.operation.lock` for their whole
//! duration; the lock is released when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{KeeperError, KeeperResult};

/// Held while a rotation or backup snapshot runs
#[derive(Debug)]
pub struct OperationLock {
    file: File,
    path: PathBuf,
    operation: &'static str,
}

impl OperationLock {
    /// Try to take the lock without waiting
    ///
    /// Returns `KeeperError::Busy` when another rotation or backup holds it.
    pub fn acquire(path: &Path, operation: &'static str) -> KeeperResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                KeeperError::Io(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        file.try_lock_exclusive().map_err(|_| {
            KeeperError::Busy(format!(
                "cannot start {}: another rotation or backup is running",
                operation
            ))
        })?;

        debug!(operation, lock = %path.display(), "operation lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            operation,
        })
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!(operation = self.operation, error = %e, "failed to release operation lock");
        } else {
            debug!(operation = self.operation, lock = %self.path.display(), "operation lock released");
        }
    }
}
