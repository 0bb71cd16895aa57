//! Restore controller for dbkeeper
//!
//! Restoring is split across two process lifetimes. `schedule_restore`
//! validates the archive, writes a marker file and terminates the process.
//! On the next start, `check_and_execute_restore` runs before any database
//! handle is opened, replaces the database directory with the archive
//! contents and removes the marker.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::paths::KeeperPaths;
use crate::error::{KeeperError, KeeperResult};
use crate::storage::file_io::{read_json_required, remove_file_if_exists, write_json_atomic};

use super::archive::{self, ValidationReport};
use super::progress::{ProgressHub, ProgressPhase};

/// Marker persisted between scheduling and executing a restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePending {
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// Where the controller is in the restore lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    Idle,
    PendingScheduled,
    Executing,
    Completed,
    Failed,
}

impl std::fmt::Display for RestoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RestoreState::Idle => "idle",
            RestoreState::PendingScheduled => "pending",
            RestoreState::Executing => "executing",
            RestoreState::Completed => "completed",
            RestoreState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Ends the process once a restore has been scheduled
pub trait ProcessExit: Send + Sync {
    fn terminate(&self);
}

/// Exits with status 0; the user relaunches the application
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitProcess;

impl ProcessExit for ExitProcess {
    fn terminate(&self) {
        info!("exiting so the restore can run on next start");
        std::process::exit(0);
    }
}

/// Schedules restores and applies them at startup
pub struct RestoreController {
    paths: KeeperPaths,
    progress: Arc<ProgressHub>,
    exit: Box<dyn ProcessExit>,
    state: RestoreState,
}

impl RestoreController {
    /// Create a controller that exits the process after scheduling
    pub fn new(paths: KeeperPaths) -> Self {
        let state = if paths.restore_marker().exists() {
            RestoreState::PendingScheduled
        } else {
            RestoreState::Idle
        };
        Self {
            paths,
            progress: Arc::new(ProgressHub::new()),
            exit: Box::new(ExitProcess),
            state,
        }
    }

    /// Replace how the process is terminated after scheduling
    pub fn with_process_exit(mut self, exit: impl ProcessExit + 'static) -> Self {
        self.exit = Box::new(exit);
        self
    }

    /// Report restore progress to a shared hub
    pub fn with_progress(mut self, progress: Arc<ProgressHub>) -> Self {
        self.progress = progress;
        self
    }

    /// Hub that restore progress is reported to
    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.progress
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    /// Whether a restore marker is waiting for the next start
    pub fn has_pending_restore(&self) -> bool {
        self.paths.restore_marker().exists()
    }

    /// The scheduled restore, if any
    pub fn pending_restore(&self) -> KeeperResult<Option<RestorePending>> {
        if !self.has_pending_restore() {
            return Ok(None);
        }
        read_json_required(self.paths.restore_marker()).map(Some)
    }

    /// Validate `backup_path`, record it for the next start, and terminate
    ///
    /// Nothing on disk besides the marker changes here.
    pub fn schedule_restore(&mut self, backup_path: &Path) -> KeeperResult<()> {
        if self.state == RestoreState::Executing {
            return Err(KeeperError::Busy("a restore is already executing".into()));
        }
        if !backup_path.exists() {
            return Err(KeeperError::backup_not_found(
                backup_path.display().to_string(),
            ));
        }

        let report = archive::validate_archive(backup_path, &self.paths.databases_dir());
        report_warnings(backup_path, &report);
        report.into_result()?;

        // The process may be relaunched from another working directory
        let backup_path = fs::canonicalize(backup_path)?;
        let pending = RestorePending {
            backup_path,
            timestamp: Utc::now(),
        };
        write_json_atomic(self.paths.restore_marker(), &pending)?;
        self.state = RestoreState::PendingScheduled;

        info!(
            backup = %pending.backup_path.display(),
            "restore scheduled, will run on next start"
        );
        self.exit.terminate();
        Ok(())
    }

    /// Drop a scheduled restore; returns false when none was pending
    pub fn cancel_pending_restore(&mut self) -> KeeperResult<bool> {
        let removed = remove_file_if_exists(self.paths.restore_marker())?;
        if removed {
            info!("pending restore cancelled");
            if self.state == RestoreState::PendingScheduled {
                self.state = RestoreState::Idle;
            }
        }
        Ok(removed)
    }

    /// Apply a scheduled restore, if any
    ///
    /// Must run before any database file is opened. Returns `Ok(false)` when
    /// nothing was scheduled. An invalid archive removes the marker and
    /// leaves the database directory untouched. A failure after the
    /// directory was cleared removes the marker and returns
    /// `KeeperError::FatalExtraction`.
    pub fn check_and_execute_restore(&mut self) -> KeeperResult<bool> {
        let marker = self.paths.restore_marker();
        if !marker.exists() {
            return Ok(false);
        }

        self.state = RestoreState::Executing;
        self.progress.report(ProgressPhase::Preparing, 0.0, None);

        let pending = match self.load_and_validate() {
            Ok(pending) => pending,
            Err(e) => return Err(self.fail(e)),
        };

        info!(backup = %pending.backup_path.display(), "executing scheduled restore");
        if let Err(e) = self.replace_databases(&pending.backup_path) {
            let fatal = match e {
                KeeperError::FatalExtraction(_) => e,
                other => KeeperError::FatalExtraction(other.to_string()),
            };
            return Err(self.fail(fatal));
        }

        // The data is already restored; a stale marker must not fail the boot
        if let Err(e) = remove_file_if_exists(&marker) {
            error!(error = %e, marker = %marker.display(), "failed to remove restore marker");
        }
        self.state = RestoreState::Completed;
        self.progress.report(ProgressPhase::Completed, 100.0, None);
        info!(backup = %pending.backup_path.display(), "restore completed");
        Ok(true)
    }

    fn load_and_validate(&self) -> KeeperResult<RestorePending> {
        let pending: RestorePending = read_json_required(self.paths.restore_marker())
            .map_err(|e| KeeperError::Validation(format!("Restore marker is unreadable: {}", e)))?;

        self.progress.report(
            ProgressPhase::Validating,
            5.0,
            pending.backup_path.file_name().and_then(|n| n.to_str()),
        );
        let report = archive::validate_archive(&pending.backup_path, &self.paths.databases_dir());
        report_warnings(&pending.backup_path, &report);
        report.into_result()?;
        Ok(pending)
    }

    fn replace_databases(&self, backup_path: &Path) -> KeeperResult<()> {
        let mut zip = archive::open_archive(backup_path)?;
        let databases_dir = self.paths.databases_dir();

        self.progress.report(ProgressPhase::Clearing, 10.0, None);
        let removed = clear_directory(&databases_dir)?;
        info!(removed, dir = %databases_dir.display(), "database directory cleared");

        let written = archive::extract_archive(
            &mut zip,
            &databases_dir,
            self.paths.base_dir(),
            &self.progress,
        )
        .map_err(|e| KeeperError::FatalExtraction(e.to_string()))?;

        self.progress.report(ProgressPhase::Finalizing, 98.0, None);
        info!(files = written.len(), "archive extracted");
        Ok(())
    }

    fn fail(&mut self, err: KeeperError) -> KeeperError {
        self.state = RestoreState::Failed;
        self.progress.report(ProgressPhase::Failed, 100.0, None);
        if let Err(e) = remove_file_if_exists(self.paths.restore_marker()) {
            error!(error = %e, "failed to remove restore marker");
        }
        error!(error = %err, "restore failed");
        err
    }
}

fn report_warnings(path: &Path, report: &ValidationReport) {
    for warning in &report.warnings {
        warn!(backup = %path.display(), "{}", warning);
    }
}

/// Remove every file in `dir`; returns how many were removed
fn clear_directory(dir: &Path) -> KeeperResult<usize> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path).map_err(|e| {
                KeeperError::Io(format!("Failed to remove {}: {}", path.display(), e))
            })?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manager::BackupManager;
    use crate::config::settings::RotationSettings;
    use crate::storage::{default_schema, RotationManager};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct RecordingExit(Arc<AtomicUsize>);

    impl ProcessExit for RecordingExit {
        fn terminate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_paths() -> (KeeperPaths, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());
        paths.ensure_directories().unwrap();
        (paths, temp_dir)
    }

    fn seed_databases(paths: &KeeperPaths) {
        let mut rotation =
            RotationManager::new(
                paths.clone(),
                Box::new(default_schema()),
                RotationSettings::default(),
            );
        rotation.initialize(None, None).unwrap();
        rotation
            .connection()
            .unwrap()
            .execute("INSERT INTO users (username) VALUES ('grace')", [])
            .unwrap();
        rotation.rotate().unwrap();
        rotation.close().unwrap();
    }

    fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .map(|p| {
                (
                    p.file_name().unwrap().to_string_lossy().to_string(),
                    fs::read(&p).unwrap(),
                )
            })
            .collect()
    }

    fn controller(paths: &KeeperPaths) -> (RestoreController, Arc<AtomicUsize>) {
        let exit = RecordingExit::default();
        let calls = exit.0.clone();
        (
            RestoreController::new(paths.clone()).with_process_exit(exit),
            calls,
        )
    }

    #[test]
    fn test_no_marker_is_fast_path() {
        let (paths, _temp) = test_paths();
        let (mut restore, _) = controller(&paths);

        assert_eq!(restore.state(), RestoreState::Idle);
        assert!(!restore.check_and_execute_restore().unwrap());
        assert_eq!(restore.state(), RestoreState::Idle);
    }

    #[test]
    fn test_round_trip_reproduces_files() {
        let (source, _src_temp) = test_paths();
        seed_databases(&source);
        let before = snapshot(&source.databases_dir());
        let backup = BackupManager::new(source.clone())
            .create_manual_backup(None)
            .path
            .unwrap();

        // Clean install elsewhere
        let (target, _dst_temp) = test_paths();
        let (mut restore, calls) = controller(&target);
        restore.schedule_restore(&backup).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (mut restore, _) = controller(&target);
        assert!(restore.check_and_execute_restore().unwrap());
        assert_eq!(restore.state(), RestoreState::Completed);

        assert_eq!(snapshot(&target.databases_dir()), before);
    }

    #[test]
    fn test_pending_flag_lifecycle() {
        let (paths, _temp) = test_paths();
        seed_databases(&paths);
        let backup = BackupManager::new(paths.clone())
            .create_manual_backup(None)
            .path
            .unwrap();

        let (mut restore, _) = controller(&paths);
        assert!(!restore.has_pending_restore());

        restore.schedule_restore(&backup).unwrap();
        assert!(restore.has_pending_restore());
        assert_eq!(restore.state(), RestoreState::PendingScheduled);
        let pending = restore.pending_restore().unwrap().unwrap();
        assert_eq!(pending.backup_path, fs::canonicalize(&backup).unwrap());

        restore.check_and_execute_restore().unwrap();
        assert!(!restore.has_pending_restore());
    }

    #[test]
    fn test_new_controller_sees_existing_marker() {
        let (paths, _temp) = test_paths();
        seed_databases(&paths);
        let backup = BackupManager::new(paths.clone())
            .create_manual_backup(None)
            .path
            .unwrap();
        controller(&paths).0.schedule_restore(&backup).unwrap();

        let (restore, _) = controller(&paths);
        assert_eq!(restore.state(), RestoreState::PendingScheduled);
    }

    #[test]
    fn test_schedule_rejects_invalid_archive() {
        let (paths, _temp) = test_paths();
        let bogus = paths.base_dir().join("bogus.zip");
        fs::write(&bogus, b"not a zip").unwrap();

        let (mut restore, calls) = controller(&paths);
        let err = restore.schedule_restore(&bogus).unwrap_err();
        assert!(err.is_validation());
        assert!(!restore.has_pending_restore());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_schedule_missing_archive() {
        let (paths, _temp) = test_paths();
        let (mut restore, _) = controller(&paths);
        let err = restore
            .schedule_restore(&paths.base_dir().join("missing.zip"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_archive_at_startup_keeps_databases() {
        let (paths, _temp) = test_paths();
        seed_databases(&paths);
        let before = snapshot(&paths.databases_dir());

        // Archive became corrupt between scheduling and restart
        let bogus = paths.base_dir().join("corrupt.zip");
        fs::write(&bogus, b"garbage").unwrap();
        write_json_atomic(
            paths.restore_marker(),
            &RestorePending {
                backup_path: bogus,
                timestamp: Utc::now(),
            },
        )
        .unwrap();

        let (mut restore, _) = controller(&paths);
        let err = restore.check_and_execute_restore().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(restore.state(), RestoreState::Failed);
        assert!(!restore.has_pending_restore());
        assert_eq!(snapshot(&paths.databases_dir()), before);
    }

    #[test]
    fn test_extraction_failure_after_clear_is_fatal() {
        let (source, _src_temp) = test_paths();
        seed_databases(&source);
        let backup = BackupManager::new(source.clone())
            .create_manual_backup(None)
            .path
            .unwrap();

        let (target, _dst_temp) = test_paths();
        let stray = target.databases_dir().join("stray.db");
        fs::write(&stray, b"old").unwrap();
        // A directory where the first database file must go survives the clear
        fs::create_dir_all(target.database_file(1)).unwrap();

        let (mut restore, _) = controller(&target);
        restore.schedule_restore(&backup).unwrap();

        let (mut restore, _) = controller(&target);
        let err = restore.check_and_execute_restore().unwrap_err();
        assert!(matches!(err, KeeperError::FatalExtraction(_)));
        assert_eq!(restore.state(), RestoreState::Failed);
        assert!(!restore.has_pending_restore());
        assert!(!stray.exists());
    }

    #[test]
    fn test_corrupt_marker_is_discarded() {
        let (paths, _temp) = test_paths();
        fs::write(paths.restore_marker(), b"{ nope").unwrap();

        let (mut restore, _) = controller(&paths);
        assert!(restore.check_and_execute_restore().is_err());
        assert!(!restore.has_pending_restore());
    }

    #[test]
    fn test_cancel_pending_restore() {
        let (paths, _temp) = test_paths();
        seed_databases(&paths);
        let backup = BackupManager::new(paths.clone())
            .create_manual_backup(None)
            .path
            .unwrap();

        let (mut restore, _) = controller(&paths);
        assert!(!restore.cancel_pending_restore().unwrap());

        restore.schedule_restore(&backup).unwrap();
        assert!(restore.cancel_pending_restore().unwrap());
        assert!(!restore.has_pending_restore());
        assert_eq!(restore.state(), RestoreState::Idle);
    }

    #[test]
    fn test_restore_progress_events() {
        let (paths, _temp) = test_paths();
        seed_databases(&paths);
        let backup = BackupManager::new(paths.clone())
            .create_manual_backup(None)
            .path
            .unwrap();
        controller(&paths).0.schedule_restore(&backup).unwrap();

        let (mut restore, _) = controller(&paths);
        let (_id, rx) = restore.progress().subscribe();
        restore.check_and_execute_restore().unwrap();

        let phases: Vec<_> = rx.try_iter().map(|e| e.phase).collect();
        assert!(phases.contains(&ProgressPhase::Clearing));
        assert!(phases.contains(&ProgressPhase::Extracting));
        assert_eq!(*phases.last().unwrap(), ProgressPhase::Completed);
    }
}
