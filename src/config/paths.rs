//! Path management for dbkeeper
//!
//! Every file the durability layer touches lives under one application data
//! directory:
//!
//! ```text
//! <appData>/
//! ├── config.json              # rotation settings
//! ├── backup-config.json       # automatic backup policy
//! ├── .restore-pending.json    # restore marker (transient)
//! ├── .operation.lock          # rotation/backup mutual exclusion
//! ├── user-data.json           # optional, included in archives
//! ├── license.json             # optional, included in archives
//! ├── databases/
//! │   ├── topology.json
//! │   ├── database-000001.db
//! │   └── database-000002.db
//! └── backups/
//!     ├── manual/
//!     └── auto/
//! ```
//!
//! ## Path Resolution Order
//!
//! 1. `DBKEEPER_DATA_DIR` environment variable (if set)
//! 2. Unix: `$XDG_DATA_HOME/dbkeeper` or `~/.local/share/dbkeeper`
//! 3. Windows: `%APPDATA%\dbkeeper`

use std::path::PathBuf;

use crate::error::KeeperError;

/// Prefix shared by every database file name
pub const DATABASE_FILE_PREFIX: &str = "database-";

/// Extension of database files
pub const DATABASE_FILE_EXTENSION: &str = "db";

/// Manages all paths used by dbkeeper
#[derive(Debug, Clone)]
pub struct KeeperPaths {
    /// Base application data directory
    base_dir: PathBuf,
}

impl KeeperPaths {
    /// Create a new KeeperPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home/application data directory can be found.
    pub fn new() -> Result<Self, KeeperError> {
        let base_dir = if let Ok(custom) = std::env::var("DBKEEPER_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            resolve_default_path()?
        };

        Ok(Self { base_dir })
    }

    /// Create KeeperPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base application data directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Directory holding the database file sequence and topology index
    pub fn databases_dir(&self) -> PathBuf {
        self.base_dir.join("databases")
    }

    /// Path to the topology index
    pub fn topology_file(&self) -> PathBuf {
        self.databases_dir().join("topology.json")
    }

    /// File name for a given sequence number, e.g. `database-000001.db`
    pub fn database_file_name(sequence_number: u32) -> String {
        format!(
            "{}{:06}.{}",
            DATABASE_FILE_PREFIX, sequence_number, DATABASE_FILE_EXTENSION
        )
    }

    /// Full path for a given sequence number
    pub fn database_file(&self, sequence_number: u32) -> PathBuf {
        self.databases_dir()
            .join(Self::database_file_name(sequence_number))
    }

    /// Get the backup directory
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Default location for manual backups
    pub fn manual_backup_dir(&self) -> PathBuf {
        self.backup_dir().join("manual")
    }

    /// Location of automatic backups (subject to retention)
    pub fn auto_backup_dir(&self) -> PathBuf {
        self.backup_dir().join("auto")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the automatic backup configuration
    pub fn backup_config_file(&self) -> PathBuf {
        self.base_dir.join("backup-config.json")
    }

    /// Well-known location of the restore marker
    pub fn restore_marker(&self) -> PathBuf {
        self.base_dir.join(".restore-pending.json")
    }

    /// Lock file guarding rotation and backup snapshots
    pub fn lock_file(&self) -> PathBuf {
        self.base_dir.join(".operation.lock")
    }

    /// Optional user profile data carried in backups
    pub fn user_data_file(&self) -> PathBuf {
        self.base_dir.join("user-data.json")
    }

    /// Optional license file carried in backups
    pub fn license_file(&self) -> PathBuf {
        self.base_dir.join("license.json")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), KeeperError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| KeeperError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.databases_dir()).map_err(|e| {
            KeeperError::Io(format!("Failed to create databases directory: {}", e))
        })?;

        std::fs::create_dir_all(self.backup_dir())
            .map_err(|e| KeeperError::Io(format!("Failed to create backup directory: {}", e)))?;

        Ok(())
    }
}

/// Parse the sequence number out of a database file name
pub fn parse_database_file_name(filename: &str) -> Option<u32> {
    let digits = filename
        .strip_prefix(DATABASE_FILE_PREFIX)?
        .strip_suffix(DATABASE_FILE_EXTENSION)?
        .strip_suffix('.')?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}

/// Resolve the default data directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, KeeperError> {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return Ok(PathBuf::from(data_home).join("dbkeeper"));
    }

    let home = std::env::var("HOME")
        .map_err(|_| KeeperError::Config("HOME environment variable not set".into()))?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("dbkeeper"))
}

/// Resolve the default data directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, KeeperError> {
    let appdata = std::env::var("APPDATA")
        .map_err(|_| KeeperError::Config("Could not determine APPDATA directory".into()))?;
    Ok(PathBuf::from(appdata).join("dbkeeper"))
}
