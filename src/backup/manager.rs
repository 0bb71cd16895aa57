//! Backup manager for dbkeeper
//!
//! Snapshots the whole database topology into a zip archive, keeps a rolling
//! window of automatic backups, and persists the automatic backup policy.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::paths::KeeperPaths;
use crate::error::{KeeperError, KeeperResult};
use crate::storage::file_io::remove_file_if_exists;
use crate::storage::{OperationLock, Topology};

use super::archive::{self, ArchiveSource, ValidationReport};
use super::config::BackupConfig;
use super::manifest::{
    BackupManifest, BackupType, ManifestDatabase, DATABASES_PREFIX, LICENSE_ENTRY,
    USER_DATA_ENTRY,
};
use super::progress::{ProgressHub, ProgressPhase};
use super::snapshot::SnapshotDir;

const MANUAL_PREFIX: &str = "backup-";
const AUTO_PREFIX: &str = "auto-backup-";
const ARCHIVE_EXTENSION: &str = "zip";

/// Result of a manual backup; failures are reported here, never raised
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub success: bool,
    pub path: Option<PathBuf>,
    pub size: Option<u64>,
    pub error: Option<String>,
}

impl BackupOutcome {
    fn from_result(result: KeeperResult<BackupReport>) -> Self {
        match result {
            Ok(report) => Self {
                success: true,
                path: Some(report.path),
                size: Some(report.size_bytes),
                error: None,
            },
            Err(e) => Self {
                success: false,
                path: None,
                size: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// A finished archive
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub manifest: BackupManifest,
}

/// Metadata about an archive found in a backup directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoBackupInfo {
    /// Backup filename
    pub filename: String,
    /// Full path to backup
    pub path: PathBuf,
    /// When the backup was created, from the filename
    pub created_at: DateTime<Utc>,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Creates, lists and prunes backup archives
pub struct BackupManager {
    paths: KeeperPaths,
    progress: Arc<ProgressHub>,
}

impl BackupManager {
    /// Create a new BackupManager with its own progress hub
    pub fn new(paths: KeeperPaths) -> Self {
        Self::with_progress(paths, Arc::new(ProgressHub::new()))
    }

    /// Create a BackupManager reporting to a shared progress hub
    pub fn with_progress(paths: KeeperPaths, progress: Arc<ProgressHub>) -> Self {
        Self { paths, progress }
    }

    /// Hub that archive progress is reported to
    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.progress
    }

    pub fn paths(&self) -> &KeeperPaths {
        &self.paths
    }

    /// User-initiated backup
    ///
    /// `output` may be a file path or an existing directory; by default the
    /// archive lands in `backups/manual/`.
    pub fn create_manual_backup(&self, output: Option<&Path>) -> BackupOutcome {
        BackupOutcome::from_result(self.create_backup(BackupType::Manual, output))
    }

    /// Backup into the automatic backup directory
    pub fn create_auto_backup(&self) -> BackupOutcome {
        BackupOutcome::from_result(self.create_backup(BackupType::Auto, None))
    }

    /// Snapshot every database file, the topology index and the optional
    /// user data and license files into one archive
    pub fn create_backup(
        &self,
        backup_type: BackupType,
        output: Option<&Path>,
    ) -> KeeperResult<BackupReport> {
        let result = self.create_backup_locked(backup_type, output);
        match &result {
            Ok(report) => {
                self.progress
                    .report(ProgressPhase::Completed, 100.0, None);
                info!(
                    backup_type = %backup_type,
                    path = %report.path.display(),
                    size = report.size_bytes,
                    databases = report.manifest.databases.len(),
                    "backup created"
                );
            }
            Err(e) => {
                self.progress.report(ProgressPhase::Failed, 100.0, None);
                error!(backup_type = %backup_type, error = %e, "backup failed");
            }
        }
        result
    }

    fn create_backup_locked(
        &self,
        backup_type: BackupType,
        output: Option<&Path>,
    ) -> KeeperResult<BackupReport> {
        let _lock = OperationLock::acquire(&self.paths.lock_file(), "backup")?;
        self.progress.report(ProgressPhase::Preparing, 0.0, None);

        let topology = match Topology::load(&self.paths)? {
            Some(topology) => topology,
            None => Topology::recover(&self.paths)?.ok_or_else(|| {
                KeeperError::database_not_found(self.paths.databases_dir().display().to_string())
            })?,
        };

        let now = Utc::now();
        let files = topology.files(&self.paths);
        let backup_dir = self.paths.backup_dir();
        fs::create_dir_all(&backup_dir).map_err(|e| {
            KeeperError::Io(format!("Failed to create backup directory: {}", e))
        })?;
        let snapshots = SnapshotDir::create(&backup_dir)?;

        let mut sources = Vec::with_capacity(files.len() + 3);
        let mut databases = Vec::with_capacity(files.len());
        for file in &files {
            if !file.path.exists() {
                return Err(KeeperError::database_not_found(file.filename.clone()));
            }
            self.progress
                .report(ProgressPhase::Preparing, 0.0, Some(&file.filename));
            let (copy, size) = snapshots.snapshot(&file.path, &file.filename)?;
            sources.push(ArchiveSource {
                entry: format!("{}{}", DATABASES_PREFIX, file.filename),
                path: copy,
            });
            databases.push(ManifestDatabase {
                filename: file.filename.clone(),
                size,
                is_active: file.is_active,
            });
        }

        let topology_file = self.paths.topology_file();
        if topology_file.exists() {
            sources.push(ArchiveSource {
                entry: format!("{}topology.json", DATABASES_PREFIX),
                path: topology_file,
            });
        }

        let has_user_data = self.push_if_exists(&mut sources, USER_DATA_ENTRY, self.paths.user_data_file());
        let has_license = self.push_if_exists(&mut sources, LICENSE_ENTRY, self.paths.license_file());

        let manifest = BackupManifest::new(backup_type, now, databases, has_user_data, has_license);
        let target = self.resolve_target(backup_type, output, now);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                KeeperError::Io(format!("Failed to create backup directory: {}", e))
            })?;
        }

        // Never leave a truncated archive under the final name
        let partial = partial_path(&target);
        let size_bytes = match archive::write_archive(&partial, &sources, &manifest, &self.progress)
        {
            Ok(size) => size,
            Err(e) => {
                let _ = remove_file_if_exists(&partial);
                return Err(e);
            }
        };
        fs::rename(&partial, &target).map_err(|e| {
            let _ = remove_file_if_exists(&partial);
            KeeperError::Io(format!("Failed to finalize backup: {}", e))
        })?;

        Ok(BackupReport {
            path: target,
            size_bytes,
            manifest,
        })
    }

    fn push_if_exists(&self, sources: &mut Vec<ArchiveSource>, entry: &str, path: PathBuf) -> bool {
        if path.is_file() {
            sources.push(ArchiveSource {
                entry: entry.to_string(),
                path,
            });
            true
        } else {
            false
        }
    }

    fn resolve_target(
        &self,
        backup_type: BackupType,
        output: Option<&Path>,
        now: DateTime<Utc>,
    ) -> PathBuf {
        let name = backup_file_name(backup_type, now);
        match (backup_type, output) {
            (_, Some(path)) if path.is_dir() => path.join(name),
            (_, Some(path)) => path.to_path_buf(),
            (BackupType::Manual, None) => self.paths.manual_backup_dir().join(name),
            (BackupType::Auto, None) => self.paths.auto_backup_dir().join(name),
        }
    }

    /// Automatic backups, newest first
    pub fn list_auto_backups(&self) -> KeeperResult<Vec<AutoBackupInfo>> {
        list_archives(&self.paths.auto_backup_dir(), AUTO_PREFIX)
    }

    /// Manual backups in the default directory, newest first
    pub fn list_manual_backups(&self) -> KeeperResult<Vec<AutoBackupInfo>> {
        list_archives(&self.paths.manual_backup_dir(), MANUAL_PREFIX)
    }

    /// Get the most recent automatic backup
    pub fn get_latest_auto_backup(&self) -> KeeperResult<Option<AutoBackupInfo>> {
        Ok(self.list_auto_backups()?.into_iter().next())
    }

    /// Delete automatic backups beyond the newest `keep_last_n`
    pub fn enforce_retention(&self, keep_last_n: u32) -> KeeperResult<Vec<PathBuf>> {
        if keep_last_n < 1 {
            return Err(KeeperError::Config("keepLastN must be at least 1".into()));
        }

        let mut deleted = Vec::new();
        for backup in self
            .list_auto_backups()?
            .into_iter()
            .skip(keep_last_n as usize)
        {
            fs::remove_file(&backup.path).map_err(|e| {
                KeeperError::Io(format!("Failed to delete old backup: {}", e))
            })?;
            info!(path = %backup.path.display(), "old automatic backup deleted");
            deleted.push(backup.path);
        }

        Ok(deleted)
    }

    /// Validate and persist the automatic backup policy
    pub fn save_config(&self, config: &BackupConfig) -> KeeperResult<()> {
        config.save(&self.paths)
    }

    /// Load the automatic backup policy, or its defaults
    pub fn load_config(&self) -> KeeperResult<BackupConfig> {
        BackupConfig::load(&self.paths)
    }

    /// Inspect an archive without extracting anything
    pub fn validate_backup(&self, path: &Path) -> ValidationReport {
        self.progress
            .report(ProgressPhase::Validating, 0.0, path.file_name().and_then(|n| n.to_str()));
        let report = archive::validate_archive(path, &self.paths.databases_dir());
        if !report.is_valid {
            warn!(path = %path.display(), errors = ?report.errors, "backup failed validation");
        }
        report
    }
}

/// Archive name for a backup taken at `now`
pub fn backup_file_name(backup_type: BackupType, now: DateTime<Utc>) -> String {
    let prefix = match backup_type {
        BackupType::Manual => MANUAL_PREFIX,
        BackupType::Auto => AUTO_PREFIX,
    };
    format!(
        "{}{}-{:03}.{}",
        prefix,
        now.format("%Y%m%d-%H%M%S"),
        now.timestamp_subsec_millis(),
        ARCHIVE_EXTENSION
    )
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

fn list_archives(dir: &Path, prefix: &str) -> KeeperResult<Vec<AutoBackupInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)
        .map_err(|e| KeeperError::Io(format!("Failed to read backup directory: {}", e)))?
    {
        let entry =
            entry.map_err(|e| KeeperError::Io(format!("Failed to read directory entry: {}", e)))?;
        if let Some(info) = parse_backup_info(&entry.path(), prefix) {
            backups.push(info);
        }
    }

    // Newest first
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(backups)
}

fn parse_backup_info(path: &Path, prefix: &str) -> Option<AutoBackupInfo> {
    let filename = path.file_name()?.to_string_lossy().to_string();
    let date_part = filename
        .strip_prefix(prefix)?
        .strip_suffix(ARCHIVE_EXTENSION)?
        .strip_suffix('.')?;
    let created_at = parse_backup_timestamp(date_part)?;
    let size_bytes = fs::metadata(path).ok()?.len();

    Some(AutoBackupInfo {
        filename,
        path: path.to_path_buf(),
        created_at,
        size_bytes,
    })
}

/// Parse `YYYYMMDD-HHMMSS` or `YYYYMMDD-HHMMSS-mmm`
fn parse_backup_timestamp(date_str: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = date_str.split('-').collect();
    let (date_part, time_part, millis) = match parts.as_slice() {
        [date, time] => (*date, *time, 0),
        [date, time, millis] => (*date, *time, millis.parse().ok()?),
        _ => return None,
    };

    if date_part.len() != 8 || time_part.len() != 6 {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(
        date_part[0..4].parse().ok()?,
        date_part[4..6].parse().ok()?,
        date_part[6..8].parse().ok()?,
    )?;
    let time = NaiveTime::from_hms_milli_opt(
        time_part[0..2].parse().ok()?,
        time_part[2..4].parse().ok()?,
        time_part[4..6].parse().ok()?,
        millis,
    )?;

    Some(DateTime::from_naive_utc_and_offset(
        NaiveDateTime::new(date, time),
        Utc,
    ))
}
