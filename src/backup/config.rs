//! Automatic backup policy
//!
//! A closed structure: unknown fields are rejected when the file is read,
//! and retention/frequency values are checked before anything is persisted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::paths::KeeperPaths;
use crate::error::{KeeperError, KeeperResult};
use crate::storage::file_io::{read_json_optional, write_json_atomic};

/// How often an automatic backup is due
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupFrequency {
    #[default]
    Daily,
    Weekly,
}

impl BackupFrequency {
    /// Minimum time between two automatic backups
    pub fn interval(&self) -> Duration {
        match self {
            BackupFrequency::Daily => Duration::days(1),
            BackupFrequency::Weekly => Duration::weeks(1),
        }
    }
}

impl std::str::FromStr for BackupFrequency {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            other => Err(KeeperError::Config(format!(
                "Unknown backup frequency '{}', expected 'daily' or 'weekly'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupFrequency::Daily => write!(f, "daily"),
            BackupFrequency::Weekly => write!(f, "weekly"),
        }
    }
}

/// Process-wide automatic backup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackupConfig {
    #[serde(default)]
    pub auto_backup_enabled: bool,

    #[serde(default)]
    pub auto_backup_frequency: BackupFrequency,

    #[serde(default = "default_keep_last_n")]
    pub keep_last_n: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_auto_backup: Option<DateTime<Utc>>,
}

fn default_keep_last_n() -> u32 {
    5
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            auto_backup_enabled: false,
            auto_backup_frequency: BackupFrequency::default(),
            keep_last_n: default_keep_last_n(),
            last_auto_backup: None,
        }
    }
}

impl BackupConfig {
    /// Check retention bounds
    pub fn validate(&self) -> KeeperResult<()> {
        if self.keep_last_n < 1 {
            return Err(KeeperError::Config("keepLastN must be at least 1".into()));
        }
        Ok(())
    }

    /// Load the persisted config, or the defaults if none was saved yet
    pub fn load(paths: &KeeperPaths) -> KeeperResult<Self> {
        let config: Option<BackupConfig> = read_json_optional(paths.backup_config_file())
            .map_err(|e| match e {
                KeeperError::Json(msg) => KeeperError::Config(msg),
                other => other,
            })?;
        let config = config.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Validate and atomically persist
    pub fn save(&self, paths: &KeeperPaths) -> KeeperResult<()> {
        self.validate()?;
        write_json_atomic(paths.backup_config_file(), self)?;
        info!(
            enabled = self.auto_backup_enabled,
            frequency = %self.auto_backup_frequency,
            keep_last_n = self.keep_last_n,
            "backup config saved"
        );
        Ok(())
    }

    /// Whether an automatic backup should run at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.auto_backup_enabled {
            return false;
        }
        match self.last_auto_backup {
            None => true,
            Some(last) => now - last >= self.auto_backup_frequency.interval(),
        }
    }

    /// When the next automatic backup becomes due, if enabled
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        if !self.auto_backup_enabled {
            return None;
        }
        Some(
            self.last_auto_backup
                .map(|last| last + self.auto_backup_frequency.interval())
                .unwrap_or_else(Utc::now),
        )
    }
}
