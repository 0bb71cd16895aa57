//! Topology index: the ordered set of database files plus which one is active
//!
//! The index is the single source of truth for the active pointer. It is
//! always replaced as a whole through an atomic rename, so there is no
//! window in which two files (or none) are marked active.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::paths::{parse_database_file_name, KeeperPaths};
use crate::error::{KeeperError, KeeperResult};

use super::file_io::{read_json_optional, write_json_atomic};

/// Current topology index format
pub const TOPOLOGY_VERSION: u32 = 1;

/// One database file as recorded in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    pub filename: String,
    pub sequence_number: u32,
    pub created_at: DateTime<Utc>,
}

/// On-disk topology index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub version: u32,
    pub active_sequence: u32,
    pub databases: Vec<TopologyEntry>,
}

/// A database file with its measured size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseFile {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub is_active: bool,
    pub sequence_number: u32,
    pub created_at: DateTime<Utc>,
}

impl Topology {
    /// Topology holding a single, active file
    pub fn bootstrap(sequence_number: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            version: TOPOLOGY_VERSION,
            active_sequence: sequence_number,
            databases: vec![TopologyEntry {
                filename: KeeperPaths::database_file_name(sequence_number),
                sequence_number,
                created_at,
            }],
        }
    }

    /// Load the index, or `None` when it has never been written
    pub fn load(paths: &KeeperPaths) -> KeeperResult<Option<Self>> {
        let topology: Option<Topology> = read_json_optional(paths.topology_file())?;
        if let Some(topology) = &topology {
            topology.validate()?;
        }
        Ok(topology)
    }

    /// Atomically replace the on-disk index
    pub fn save(&self, paths: &KeeperPaths) -> KeeperResult<()> {
        self.validate()?;
        write_json_atomic(paths.topology_file(), self)
    }

    /// Rebuild the index from the files present in the database directory
    ///
    /// Used when the index is missing, e.g. after restoring an archive made
    /// without one. The highest sequence number becomes active.
    pub fn recover(paths: &KeeperPaths) -> KeeperResult<Option<Self>> {
        let dir = paths.databases_dir();
        if !dir.exists() {
            return Ok(None);
        }

        let mut databases = Vec::new();
        for entry in fs::read_dir(&dir)
            .map_err(|e| KeeperError::Io(format!("Failed to read databases directory: {}", e)))?
        {
            let entry = entry
                .map_err(|e| KeeperError::Io(format!("Failed to read directory entry: {}", e)))?;
            let filename = entry.file_name().to_string_lossy().to_string();
            let Some(sequence_number) = parse_database_file_name(&filename) else {
                continue;
            };

            let created_at = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            databases.push(TopologyEntry {
                filename,
                sequence_number,
                created_at,
            });
        }

        if databases.is_empty() {
            return Ok(None);
        }

        databases.sort_by_key(|d| d.sequence_number);
        let active_sequence = databases
            .last()
            .map(|d| d.sequence_number)
            .unwrap_or(1);

        warn!(
            files = databases.len(),
            active_sequence, "topology index missing, rebuilt from database directory"
        );

        Ok(Some(Self {
            version: TOPOLOGY_VERSION,
            active_sequence,
            databases,
        }))
    }

    /// Check the index invariants: sorted, unique, exactly one active entry
    pub fn validate(&self) -> KeeperResult<()> {
        if self.version > TOPOLOGY_VERSION {
            return Err(KeeperError::Validation(format!(
                "Topology index version {} is newer than supported version {}",
                self.version, TOPOLOGY_VERSION
            )));
        }

        if !self
            .databases
            .windows(2)
            .all(|w| w[0].sequence_number < w[1].sequence_number)
        {
            return Err(KeeperError::Validation(
                "Topology index is not strictly ordered by sequence number".into(),
            ));
        }

        let active = self
            .databases
            .iter()
            .filter(|d| d.sequence_number == self.active_sequence)
            .count();
        if active != 1 {
            return Err(KeeperError::Validation(format!(
                "Topology index must have exactly one active file, found {}",
                active
            )));
        }

        Ok(())
    }

    /// Entry of the active file
    pub fn active(&self) -> Option<&TopologyEntry> {
        self.databases
            .iter()
            .find(|d| d.sequence_number == self.active_sequence)
    }

    /// Next free sequence number
    pub fn next_sequence(&self) -> u32 {
        self.databases
            .iter()
            .map(|d| d.sequence_number)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Copy of this topology with a new active file appended
    pub fn with_new_active(&self, sequence_number: u32, created_at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.databases.push(TopologyEntry {
            filename: KeeperPaths::database_file_name(sequence_number),
            sequence_number,
            created_at,
        });
        next.active_sequence = sequence_number;
        next
    }

    /// Resolve entries to files with measured sizes
    pub fn files(&self, paths: &KeeperPaths) -> Vec<DatabaseFile> {
        self.databases
            .iter()
            .map(|entry| {
                let path = paths.databases_dir().join(&entry.filename);
                let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                DatabaseFile {
                    filename: entry.filename.clone(),
                    path,
                    size_bytes,
                    is_active: entry.sequence_number == self.active_sequence,
                    sequence_number: entry.sequence_number,
                    created_at: entry.created_at,
                }
            })
            .collect()
    }
}

/// Log a one-line summary of a freshly loaded topology
pub(crate) fn log_topology(topology: &Topology) {
    info!(
        files = topology.databases.len(),
        active_sequence = topology.active_sequence,
        "topology loaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_paths() -> (KeeperPaths, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());
        paths.ensure_directories().unwrap();
        (paths, temp_dir)
    }

    #[test]
    fn test_bootstrap_has_one_active() {
        let topology = Topology::bootstrap(1, Utc::now());
        assert!(topology.validate().is_ok());
        assert_eq!(topology.active().unwrap().filename, "database-000001.db");
        assert_eq!(topology.next_sequence(), 2);
    }

    #[test]
    fn test_with_new_active_moves_pointer() {
        let topology = Topology::bootstrap(1, Utc::now());
        let next = topology.with_new_active(2, Utc::now());

        assert!(next.validate().is_ok());
        assert_eq!(next.active_sequence, 2);
        assert_eq!(next.databases.len(), 2);
        // Original untouched until the new one is saved
        assert_eq!(topology.active_sequence, 1);
    }

    #[test]
    fn test_save_and_load() {
        let (paths, _temp) = test_paths();
        let topology = Topology::bootstrap(1, Utc::now()).with_new_active(2, Utc::now());

        topology.save(&paths).unwrap();
        let loaded = Topology::load(&paths).unwrap().unwrap();
        assert_eq!(loaded, topology);
    }

    #[test]
    fn test_validate_rejects_missing_active() {
        let mut topology = Topology::bootstrap(1, Utc::now());
        topology.active_sequence = 7;
        assert!(topology.validate().is_err());
    }

    #[test]
    fn test_recover_from_directory() {
        let (paths, _temp) = test_paths();
        fs::write(paths.database_file(1), b"").unwrap();
        fs::write(paths.database_file(3), b"").unwrap();
        fs::write(paths.databases_dir().join("notes.txt"), b"").unwrap();

        let topology = Topology::recover(&paths).unwrap().unwrap();
        assert_eq!(topology.active_sequence, 3);
        assert_eq!(topology.databases.len(), 2);
        assert_eq!(topology.next_sequence(), 4);
    }

    #[test]
    fn test_recover_empty_directory() {
        let (paths, _temp) = test_paths();
        assert!(Topology::recover(&paths).unwrap().is_none());
    }

    #[test]
    fn test_files_measure_size() {
        let (paths, _temp) = test_paths();
        fs::write(paths.database_file(1), vec![0u8; 2048]).unwrap();

        let files = Topology::bootstrap(1, Utc::now()).files(&paths);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size_bytes, 2048);
        assert!(files[0].is_active);
    }
}
