//! Backup manifest
//!
//! Every archive carries a `manifest.json` entry describing the database
//! files it holds, so an archive can be inspected and validated without
//! extracting anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Archive entry holding the manifest
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Prefix of every database entry in an archive
pub const DATABASES_PREFIX: &str = "databases/";

/// Root-level archive entry for user profile data
pub const USER_DATA_ENTRY: &str = "user-data.json";

/// Root-level archive entry for the license file
pub const LICENSE_ENTRY: &str = "license.json";

/// Manifest format written by this version
pub const MANIFEST_VERSION: &str = "1.0";

/// Manifest major version this build can restore
const SUPPORTED_MAJOR: u32 = 1;

/// Why the archive was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Auto,
    Manual,
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupType::Auto => write!(f, "auto"),
            BackupType::Manual => write!(f, "manual"),
        }
    }
}

/// One database file recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDatabase {
    pub filename: String,
    pub size: u64,
    pub is_active: bool,
}

/// Self-description of a backup archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub backup_type: BackupType,
    pub databases: Vec<ManifestDatabase>,
    pub has_user_data: bool,
    pub has_license: bool,
    pub total_size: u64,
    pub app_version: String,
}

impl BackupManifest {
    /// Manifest for a new archive; sizes are summed from `databases`
    pub fn new(
        backup_type: BackupType,
        created_at: DateTime<Utc>,
        databases: Vec<ManifestDatabase>,
        has_user_data: bool,
        has_license: bool,
    ) -> Self {
        let total_size = databases.iter().map(|d| d.size).sum();
        Self {
            version: MANIFEST_VERSION.to_string(),
            created_at,
            backup_type,
            databases,
            has_user_data,
            has_license,
            total_size,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Whether this build understands the manifest's format
    pub fn is_compatible(&self) -> bool {
        parse_major(&self.version) == Some(SUPPORTED_MAJOR)
    }

    /// The database that was active when the archive was made
    pub fn active_database(&self) -> Option<&ManifestDatabase> {
        self.databases.iter().find(|d| d.is_active)
    }
}

fn parse_major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BackupManifest {
        BackupManifest::new(
            BackupType::Manual,
            Utc::now(),
            vec![
                ManifestDatabase {
                    filename: "database-000001.db".into(),
                    size: 4096,
                    is_active: false,
                },
                ManifestDatabase {
                    filename: "database-000002.db".into(),
                    size: 8192,
                    is_active: true,
                },
            ],
            false,
            true,
        )
    }

    #[test]
    fn test_total_size_and_active() {
        let manifest = sample();
        assert_eq!(manifest.total_size, 12288);
        assert_eq!(
            manifest.active_database().unwrap().filename,
            "database-000002.db"
        );
        assert!(manifest.is_compatible());
    }

    #[test]
    fn test_version_compatibility() {
        let mut manifest = sample();
        manifest.version = "1.4".into();
        assert!(manifest.is_compatible());
        manifest.version = "2.0".into();
        assert!(!manifest.is_compatible());
        manifest.version = "garbage".into();
        assert!(!manifest.is_compatible());
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["backupType"], "manual");
        assert_eq!(value["hasLicense"], true);
        assert_eq!(value["databases"][1]["isActive"], true);
        assert_eq!(value["totalSize"], 12288);
    }
}
