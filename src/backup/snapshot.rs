//! Consistent copies of live database files
//!
//! The active file may be written through another connection while a backup
//! runs, so archives are built from online-backup copies, never from the
//! live file bytes.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::error::{KeeperError, KeeperResult};

/// Wait between attempts while a writer holds the source locked
const BUSY_PAUSE: Duration = Duration::from_millis(50);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Scratch directory for snapshots, removed when dropped
pub struct SnapshotDir {
    path: PathBuf,
}

impl SnapshotDir {
    /// Create a fresh scratch directory under `parent`
    pub fn create(parent: &Path) -> KeeperResult<Self> {
        let now = Utc::now();
        let path = parent.join(format!(
            ".snapshot-{}-{:03}-{}",
            now.format("%Y%m%d-%H%M%S"),
            now.timestamp_subsec_millis(),
            std::process::id()
        ));
        fs::create_dir_all(&path).map_err(|e| {
            KeeperError::Io(format!(
                "Failed to create snapshot directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy `source` into this directory under `filename`; returns the copy's size
    pub fn snapshot(&self, source: &Path, filename: &str) -> KeeperResult<(PathBuf, u64)> {
        let dest = self.path.join(filename);
        snapshot_database(source, &dest)?;
        let size = fs::metadata(&dest)?.len();
        Ok((dest, size))
    }
}

impl Drop for SnapshotDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove snapshot directory");
        }
    }
}

/// Copy every page of `source` into a new database at `dest`
///
/// All pages are copied in a single step, so the copy reflects one committed
/// state of the source even with concurrent writers.
pub fn snapshot_database(source: &Path, dest: &Path) -> KeeperResult<()> {
    let src = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        KeeperError::Database(format!("Failed to open {}: {}", source.display(), e))
    })?;
    src.busy_timeout(BUSY_TIMEOUT)?;

    let mut out = Connection::open(dest).map_err(|e| {
        KeeperError::Database(format!("Failed to create {}: {}", dest.display(), e))
    })?;

    {
        let backup = Backup::new(&src, &mut out)?;
        backup
            .run_to_completion(-1, BUSY_PAUSE, None)
            .map_err(|e| {
                KeeperError::Database(format!(
                    "Failed to snapshot {}: {}",
                    source.display(),
                    e
                ))
            })?;
    }

    out.close().map_err(|(_, e)| KeeperError::from(e))?;
    debug!(source = %source.display(), dest = %dest.display(), "database snapshot taken");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_copies_rows() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("live.db");
        let conn = Connection::open(&source).unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (body TEXT);
             INSERT INTO notes VALUES ('a'), ('b');",
        )
        .unwrap();

        let dir = SnapshotDir::create(temp.path()).unwrap();
        let (copy, size) = dir.snapshot(&source, "copy.db").unwrap();
        assert_eq!(size, fs::metadata(&copy).unwrap().len());

        // Writes after the snapshot do not show up in it
        conn.execute("INSERT INTO notes VALUES ('c')", []).unwrap();
        let count: i64 = Connection::open(&copy)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_snapshot_dir_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let dir = SnapshotDir::create(temp.path()).unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());

        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_snapshot_missing_source_fails() {
        let temp = TempDir::new().unwrap();
        let dir = SnapshotDir::create(temp.path()).unwrap();
        assert!(dir.snapshot(&temp.path().join("absent.db"), "x.db").is_err());
    }
}
