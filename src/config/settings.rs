//! Rotation settings for dbkeeper
//!
//! Manages the ceilings that trigger a database split, which tables are
//! replicated forward at rotation time, and which tables count towards the
//! row ceiling.

use serde::{Deserialize, Serialize};

use super::paths::KeeperPaths;
use crate::error::KeeperError;
use crate::storage::file_io::write_json_atomic;

/// Ceilings that trigger rotation; either one firing is enough
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RotationLimits {
    /// Tracked row count ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_records: Option<u64>,
    /// Byte size ceiling of the active file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
}

impl RotationLimits {
    /// Reject ceilings that would rotate on every check
    pub fn validate(&self) -> Result<(), KeeperError> {
        if self.max_records == Some(0) {
            return Err(KeeperError::Config(
                "max_records must be greater than 0".into(),
            ));
        }
        if self.max_size_bytes == Some(0) {
            return Err(KeeperError::Config(
                "max_size_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Rotation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationSettings {
    /// Size/row ceilings
    #[serde(default = "default_limits")]
    pub limits: RotationLimits,

    /// Reference tables copied into every new file
    #[serde(default = "default_master_tables")]
    pub master_tables: Vec<String>,

    /// Tables whose rows count towards `max_records`
    #[serde(default = "default_tracked_tables")]
    pub tracked_tables: Vec<String>,

    /// Default number of files kept by `db cleanup`
    #[serde(default = "default_cleanup_keep")]
    pub cleanup_keep: usize,
}

fn default_limits() -> RotationLimits {
    RotationLimits {
        max_records: Some(100_000),
        max_size_bytes: Some(512 * 1024 * 1024),
    }
}

fn default_master_tables() -> Vec<String> {
    vec!["users".into(), "settings".into(), "categories".into()]
}

fn default_tracked_tables() -> Vec<String> {
    vec!["transactions".into()]
}

fn default_cleanup_keep() -> usize {
    5
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            limits: default_limits(),
            master_tables: default_master_tables(),
            tracked_tables: default_tracked_tables(),
            cleanup_keep: default_cleanup_keep(),
        }
    }
}

/// User settings for dbkeeper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Rotation policy
    #[serde(default)]
    pub rotation: RotationSettings,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            rotation: RotationSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or create default settings if file doesn't exist
    pub fn load_or_create(paths: &KeeperPaths) -> Result<Self, KeeperError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| KeeperError::Io(format!("Failed to read settings file: {}", e)))?;

            let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
                KeeperError::Config(format!("Failed to parse settings file: {}", e))
            })?;

            settings.validate()?;
            Ok(settings)
        } else {
            // Don't save yet - let caller decide when to persist
            Ok(Settings::default())
        }
    }

    /// Check settings before they are used or persisted
    pub fn validate(&self) -> Result<(), KeeperError> {
        self.rotation.limits.validate()?;
        if self.rotation.cleanup_keep == 0 {
            return Err(KeeperError::Config(
                "cleanup_keep must be at least 1".into(),
            ));
        }
        for table in self
            .rotation
            .master_tables
            .iter()
            .chain(self.rotation.tracked_tables.iter())
        {
            if !is_valid_identifier(table) {
                return Err(KeeperError::Config(format!(
                    "Invalid table name: {:?}",
                    table
                )));
            }
        }
        Ok(())
    }

    /// Save settings to disk
    pub fn save(&self, paths: &KeeperPaths) -> Result<(), KeeperError> {
        self.validate()?;
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.rotation.limits.max_records, Some(100_000));
        assert_eq!(
            settings.rotation.master_tables,
            vec!["users", "settings", "categories"]
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut settings = Settings::default();
        settings.rotation.limits.max_records = Some(100);
        settings.rotation.master_tables = vec!["users".into()];

        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.rotation.limits.max_records, Some(100));
        assert_eq!(loaded.rotation.master_tables, vec!["users"]);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());
        std::fs::write(
            paths.settings_file(),
            r#"{"schema_version": 1, "rotation": {"max_rows": 5}}"#,
        )
        .unwrap();

        let err = Settings::load_or_create(&paths).unwrap_err();
        assert!(matches!(err, KeeperError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let limits = RotationLimits {
            max_records: Some(0),
            max_size_bytes: None,
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_valid_identifier("users"));
        assert!(is_valid_identifier("_meta2"));
        assert!(!is_valid_identifier("2users"));
        assert!(!is_valid_identifier("users; DROP TABLE x"));
        assert!(!is_valid_identifier(""));
    }
}
