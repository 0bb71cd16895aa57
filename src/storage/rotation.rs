//! Database rotation manager
//!
//! Owns the single active database handle and splits storage into a
//! sequence of files once a size or row ceiling is reached. Master tables
//! are copied forward at each split so reference lookups work from whichever
//! file is active. Retired files are never written again.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::paths::KeeperPaths;
use crate::config::settings::{RotationLimits, RotationSettings};
use crate::error::{KeeperError, KeeperResult};

use super::file_io::remove_file_if_exists;
use super::lock::OperationLock;
use super::master::{copy_master_tables, CopyMode, CopyStats, TableCopyError};
use super::schema::{database_size_bytes, install_row_tracking, tracked_row_count, SchemaMigrator};
use super::topology::{log_topology, DatabaseFile, Topology};

/// Outcome of a successful rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationResult {
    /// File name of the newly active database
    pub new_database: String,
    /// Sequence number of the newly active database
    pub new_sequence: u32,
    /// File name of the database that was active before the split
    pub old_database: String,
    /// Per-table master copy outcome
    pub copy_stats: CopyStats,
}

impl RotationResult {
    /// Turn copy failures into an error for callers that can't accept stale
    /// reference tables
    pub fn require_complete_copy(&self) -> KeeperResult<()> {
        if self.copy_stats.success {
            Ok(())
        } else {
            Err(KeeperError::PartialCopy {
                tables: self.copy_stats.failed_tables(),
            })
        }
    }
}

/// Measured state of the active file against the ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationStatus {
    pub active: DatabaseFile,
    pub tracked_rows: u64,
    pub size_bytes: u64,
    pub limits: RotationLimits,
    pub should_rotate: bool,
}

/// Manages the active database file and the file sequence
pub struct RotationManager {
    paths: KeeperPaths,
    schema: Box<dyn SchemaMigrator>,
    settings: RotationSettings,
    limits: RotationLimits,
    topology: Option<Topology>,
    conn: Option<Connection>,
}

impl RotationManager {
    /// Create a manager; nothing is opened until [`initialize`](Self::initialize)
    pub fn new(
        paths: KeeperPaths,
        schema: Box<dyn SchemaMigrator>,
        settings: RotationSettings,
    ) -> Self {
        let limits = settings.limits;
        Self {
            paths,
            schema,
            settings,
            limits,
            topology: None,
            conn: None,
        }
    }

    /// Open the most recent file as active, creating sequence 1 if none exists
    ///
    /// Limits passed here override the ones from the settings.
    pub fn initialize(
        &mut self,
        max_records: Option<u64>,
        max_size_bytes: Option<u64>,
    ) -> KeeperResult<DatabaseFile> {
        let limits = RotationLimits {
            max_records: max_records.or(self.settings.limits.max_records),
            max_size_bytes: max_size_bytes.or(self.settings.limits.max_size_bytes),
        };
        limits.validate()?;
        self.limits = limits;

        self.paths.ensure_directories()?;

        let topology = match Topology::load(&self.paths)? {
            Some(topology) => topology,
            None => match Topology::recover(&self.paths)? {
                Some(recovered) => {
                    recovered.save(&self.paths)?;
                    recovered
                }
                None => self.bootstrap()?,
            },
        };
        log_topology(&topology);

        let active = topology
            .active()
            .ok_or_else(|| KeeperError::Validation("Topology has no active file".into()))?;
        let active_path = self.paths.databases_dir().join(&active.filename);
        if !active_path.exists() {
            return Err(KeeperError::database_not_found(active.filename.clone()));
        }

        let conn = open_database(&active_path)?;
        self.conn = Some(conn);
        self.topology = Some(topology);

        let active = self.active_database()?;
        info!(
            active = %active.filename,
            max_records = ?self.limits.max_records,
            max_size_bytes = ?self.limits.max_size_bytes,
            "rotation manager initialized"
        );
        Ok(active)
    }

    /// Create sequence 1 on a clean install
    fn bootstrap(&self) -> KeeperResult<Topology> {
        let path = self.paths.database_file(1);
        info!(path = %path.display(), "creating first database file");

        if let Err(e) = self.create_database_file(&path) {
            discard_database_file(&path);
            return Err(e);
        }

        let topology = Topology::bootstrap(1, Utc::now());
        topology.save(&self.paths)?;
        Ok(topology)
    }

    /// Create a file, apply the schema and install row tracking
    fn create_database_file(&self, path: &Path) -> KeeperResult<Connection> {
        if path.exists() {
            return Err(KeeperError::Io(format!(
                "Refusing to overwrite existing database file {}",
                path.display()
            )));
        }

        let conn = open_database(path)?;
        self.schema.apply(&conn)?;
        install_row_tracking(&conn, &self.settings.tracked_tables)?;
        Ok(conn)
    }

    /// The active database handle, for the owning caller only
    pub fn connection(&self) -> KeeperResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| KeeperError::Database("Rotation manager is not initialized".into()))
    }

    fn topology(&self) -> KeeperResult<&Topology> {
        self.topology
            .as_ref()
            .ok_or_else(|| KeeperError::Database("Rotation manager is not initialized".into()))
    }

    /// The currently active file
    pub fn active_database(&self) -> KeeperResult<DatabaseFile> {
        self.topology()?
            .files(&self.paths)
            .into_iter()
            .find(|f| f.is_active)
            .ok_or_else(|| KeeperError::Validation("Topology has no active file".into()))
    }

    /// Compare the active file against the ceilings
    ///
    /// Reads one counter row and two pragmas; never scans a table.
    pub fn should_rotate(&self) -> KeeperResult<bool> {
        let conn = self.connection()?;

        if let Some(max_records) = self.limits.max_records {
            if tracked_row_count(conn)? > max_records {
                return Ok(true);
            }
        }

        if let Some(max_size_bytes) = self.limits.max_size_bytes {
            if database_size_bytes(conn)? >= max_size_bytes {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Measured state of the active file
    pub fn status(&self) -> KeeperResult<RotationStatus> {
        let conn = self.connection()?;
        Ok(RotationStatus {
            active: self.active_database()?,
            tracked_rows: tracked_row_count(conn)?,
            size_bytes: database_size_bytes(conn)?,
            limits: self.limits,
            should_rotate: self.should_rotate()?,
        })
    }

    /// Split storage: create file N+1, copy master tables, flip the pointer
    ///
    /// A schema failure leaves file N active and returns the schema error
    /// unchanged, retryable or not.
    /// Master table failures are reported in `copy_stats` and do not stop the
    /// rotation.
    pub fn rotate(&mut self) -> KeeperResult<RotationResult> {
        let _lock = OperationLock::acquire(&self.paths.lock_file(), "rotation")?;

        let topology = self.topology()?.clone();
        let old = topology
            .active()
            .cloned()
            .ok_or_else(|| KeeperError::Validation("Topology has no active file".into()))?;
        let old_path = self.paths.databases_dir().join(&old.filename);

        let next_sequence = topology.next_sequence();
        let new_path = self.paths.database_file(next_sequence);
        info!(
            from = %old.filename,
            to = %new_path.display(),
            "rotating database"
        );

        // A file already at N+1 is not ours to remove
        if new_path.exists() {
            error!(path = %new_path.display(), "next database file already exists, keeping current database active");
            return Err(KeeperError::Io(format!(
                "Refusing to overwrite existing database file {}",
                new_path.display()
            )));
        }

        let new_conn = match self.create_database_file(&new_path) {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "schema application failed, keeping current database active");
                discard_database_file(&new_path);
                return Err(e);
            }
        };

        let copy_stats = match copy_master_tables(
            &new_conn,
            &old_path,
            &self.settings.master_tables,
            CopyMode::Replace,
        ) {
            Ok(stats) => stats,
            Err(e) => {
                // Attaching the old file failed; no table could be copied
                error!(error = %e, "could not read master tables from retiring database");
                let errors = self
                    .settings
                    .master_tables
                    .iter()
                    .map(|table| TableCopyError {
                        table: table.clone(),
                        error: e.to_string(),
                    })
                    .collect();
                CopyStats {
                    success: self.settings.master_tables.is_empty(),
                    copied: Vec::new(),
                    errors,
                }
            }
        };

        let next = topology.with_new_active(next_sequence, Utc::now());
        if let Err(e) = next.save(&self.paths) {
            error!(error = %e, "failed to write topology index, keeping current database active");
            drop(new_conn);
            discard_database_file(&new_path);
            return Err(e);
        }

        // Pointer flipped: swap handles, the retired file is now frozen
        let old_conn = self.conn.replace(new_conn);
        self.topology = Some(next);
        if let Some(conn) = old_conn {
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "failed to close retired database handle");
            }
        }

        if copy_stats.success {
            info!(
                new = %KeeperPaths::database_file_name(next_sequence),
                records = copy_stats.total_records(),
                "rotation complete"
            );
        } else {
            error!(
                new = %KeeperPaths::database_file_name(next_sequence),
                failed = ?copy_stats.failed_tables(),
                "rotation complete with master table copy failures"
            );
        }

        Ok(RotationResult {
            new_database: KeeperPaths::database_file_name(next_sequence),
            new_sequence: next_sequence,
            old_database: old.filename,
            copy_stats,
        })
    }

    /// Retry master table replication from the previous file into the active one
    ///
    /// Rows already in the active file are kept; only missing ones are added.
    pub fn recopy_master_tables(&self, tables: &[String]) -> KeeperResult<CopyStats> {
        let topology = self.topology()?;
        let previous = topology
            .databases
            .iter()
            .filter(|d| d.sequence_number < topology.active_sequence)
            .max_by_key(|d| d.sequence_number)
            .ok_or_else(|| KeeperError::database_not_found("previous database"))?;

        let unknown: Vec<&String> = tables
            .iter()
            .filter(|t| !self.settings.master_tables.contains(t))
            .collect();
        if !unknown.is_empty() {
            return Err(KeeperError::Config(format!(
                "Not configured as master tables: {:?}",
                unknown
            )));
        }

        info!(from = %previous.filename, tables = ?tables, "re-copying master tables");
        copy_master_tables(
            self.connection()?,
            &self.paths.databases_dir().join(&previous.filename),
            tables,
            CopyMode::Merge,
        )
    }

    /// All database files in sequence order, with sizes
    pub fn list_databases(&self) -> KeeperResult<Vec<DatabaseFile>> {
        Ok(self.topology()?.files(&self.paths))
    }

    /// Delete inactive files so at most `keep` files remain
    ///
    /// The active file always survives. Returns the deleted paths.
    pub fn cleanup(&mut self, keep: usize) -> KeeperResult<Vec<PathBuf>> {
        if keep == 0 {
            return Err(KeeperError::Config("cleanup keep must be at least 1".into()));
        }
        let _lock = OperationLock::acquire(&self.paths.lock_file(), "cleanup")?;

        let topology = self.topology()?.clone();
        let mut inactive: Vec<_> = topology
            .databases
            .iter()
            .filter(|d| d.sequence_number != topology.active_sequence)
            .cloned()
            .collect();
        // Newest first
        inactive.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));

        let doomed: Vec<_> = inactive.into_iter().skip(keep - 1).collect();
        if doomed.is_empty() {
            return Ok(Vec::new());
        }

        // Drop them from the index first so a crash never leaves dangling entries
        let mut next = topology.clone();
        next.databases
            .retain(|d| !doomed.iter().any(|x| x.sequence_number == d.sequence_number));
        next.save(&self.paths)?;
        self.topology = Some(next);

        let mut deleted = Vec::new();
        for entry in doomed {
            let path = self.paths.databases_dir().join(&entry.filename);
            remove_database_files(&path)?;
            info!(file = %entry.filename, "deleted retired database");
            deleted.push(path);
        }

        Ok(deleted)
    }

    /// Release the active handle; safe to call more than once
    pub fn close(&mut self) -> KeeperResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| KeeperError::from(e))?;
            info!("rotation manager closed");
        }
        Ok(())
    }

    /// Whether a handle is currently open
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }
}

impl Drop for RotationManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close database on drop");
        }
    }
}

fn open_database(path: &Path) -> KeeperResult<Connection> {
    let conn = Connection::open(path).map_err(|e| {
        KeeperError::Database(format!("Failed to open {}: {}", path.display(), e))
    })?;
    // Rollback journal keeps each file self-contained on disk
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "DELETE", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("delete") {
        warn!(path = %path.display(), mode = %mode, "journal mode could not be changed");
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

fn remove_database_files(path: &Path) -> KeeperResult<()> {
    remove_file_if_exists(path)?;
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut companion = path.as_os_str().to_os_string();
        companion.push(suffix);
        remove_file_if_exists(PathBuf::from(companion))?;
    }
    Ok(())
}

fn discard_database_file(path: &Path) {
    if let Err(e) = remove_database_files(path) {
        warn!(path = %path.display(), error = %e, "failed to remove incomplete database file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{default_schema, SqlSchema};
    use rusqlite::params;
    use tempfile::TempDir;

    fn create_test_manager(settings: RotationSettings) -> (RotationManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());
        let manager = RotationManager::new(paths, Box::new(default_schema()), settings);
        (manager, temp_dir)
    }

    fn insert_transactions(manager: &RotationManager, count: usize) {
        let conn = manager.connection().unwrap();
        for i in 0..count {
            conn.execute(
                "INSERT INTO transactions (amount_cents, memo) VALUES (?1, 'row')",
                params![i as i64],
            )
            .unwrap();
        }
    }

    fn seed_master_tables(manager: &RotationManager) {
        manager
            .connection()
            .unwrap()
            .execute_batch(
                "
                INSERT INTO users (username) VALUES ('ana'), ('ben');
                INSERT INTO settings (key, value) VALUES ('currency', 'EUR');
                INSERT INTO categories (name) VALUES ('Rent');
                ",
            )
            .unwrap();
    }

    fn active_count(manager: &RotationManager) -> usize {
        manager
            .list_databases()
            .unwrap()
            .iter()
            .filter(|d| d.is_active)
            .count()
    }

    #[test]
    fn test_initialize_creates_first_file() {
        let (mut manager, temp) = create_test_manager(RotationSettings::default());

        let active = manager.initialize(None, None).unwrap();
        assert_eq!(active.sequence_number, 1);
        assert_eq!(active.filename, "database-000001.db");
        assert!(temp.path().join("databases").join("topology.json").exists());
        assert_eq!(active_count(&manager), 1);
    }

    #[test]
    fn test_initialize_reopens_most_recent() {
        let (mut manager, temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();
        manager.rotate().unwrap();
        manager.close().unwrap();

        let paths = KeeperPaths::with_base_dir(temp.path().to_path_buf());
        let mut reopened =
            RotationManager::new(paths, Box::new(default_schema()), RotationSettings::default());
        let active = reopened.initialize(None, None).unwrap();
        assert_eq!(active.sequence_number, 2);
    }

    #[test]
    fn test_should_rotate_on_record_ceiling() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(Some(100), None).unwrap();

        insert_transactions(&manager, 100);
        assert!(!manager.should_rotate().unwrap());

        insert_transactions(&manager, 1);
        assert!(manager.should_rotate().unwrap());

        let before = manager.active_database().unwrap();
        let result = manager.rotate().unwrap();
        assert_eq!(result.new_sequence, before.sequence_number + 1);
        assert_eq!(result.old_database, before.filename);
        assert!(!manager.should_rotate().unwrap());
    }

    #[test]
    fn test_should_rotate_on_size_ceiling() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, Some(64 * 1024)).unwrap();
        assert!(!manager.should_rotate().unwrap());

        let conn = manager.connection().unwrap();
        let blob = "x".repeat(4096);
        for _ in 0..32 {
            conn.execute(
                "INSERT INTO transactions (amount_cents, memo) VALUES (1, ?1)",
                params![blob],
            )
            .unwrap();
        }
        assert!(manager.should_rotate().unwrap());
    }

    #[test]
    fn test_rotate_keeps_exactly_one_active() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();

        for expected in 2..=4 {
            assert_eq!(active_count(&manager), 1);
            let result = manager.rotate().unwrap();
            assert_eq!(result.new_sequence, expected);
            assert_eq!(active_count(&manager), 1);
        }
        assert_eq!(manager.list_databases().unwrap().len(), 4);
    }

    #[test]
    fn test_rotate_copies_master_tables() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();
        seed_master_tables(&manager);
        insert_transactions(&manager, 10);

        let result = manager.rotate().unwrap();
        assert!(result.copy_stats.success);
        assert!(result.require_complete_copy().is_ok());

        let conn = manager.connection().unwrap();
        let users: Vec<String> = conn
            .prepare("SELECT username FROM users ORDER BY username")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(users, vec!["ana", "ben"]);

        // Transactional rows stay behind in the retired file
        let txns: i64 = conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(txns, 0);
    }

    #[test]
    fn test_failed_master_copy_does_not_abort() {
        let mut settings = RotationSettings::default();
        settings.master_tables = vec!["users".into(), "audit_trail".into()];
        let (mut manager, _temp) = create_test_manager(settings);
        manager.initialize(None, None).unwrap();
        seed_master_tables(&manager);

        let result = manager.rotate().unwrap();
        assert!(!result.copy_stats.success);
        assert_eq!(result.copy_stats.failed_tables(), vec!["audit_trail"]);
        assert_eq!(result.copy_stats.copied[0].records, 2);
        assert!(matches!(
            result.require_complete_copy(),
            Err(KeeperError::PartialCopy { .. })
        ));
        assert_eq!(manager.active_database().unwrap().sequence_number, 2);
    }

    #[test]
    fn test_schema_failure_keeps_old_active() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());
        let mut manager = RotationManager::new(
            paths.clone(),
            Box::new(default_schema()),
            RotationSettings::default(),
        );
        manager.initialize(None, None).unwrap();
        manager.schema = Box::new(SqlSchema::new("CREATE TABLE broken ("));

        let err = manager.rotate().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(manager.active_database().unwrap().sequence_number, 1);
        assert!(!paths.database_file(2).exists());
        assert_eq!(
            Topology::load(&paths).unwrap().unwrap().active_sequence,
            1
        );
    }

    #[test]
    fn test_rotate_leaves_existing_next_file_alone() {
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());
        let mut manager = RotationManager::new(
            paths.clone(),
            Box::new(default_schema()),
            RotationSettings::default(),
        );
        manager.initialize(None, None).unwrap();
        std::fs::write(paths.database_file(2), b"precious bytes").unwrap();

        let err = manager.rotate().unwrap_err();
        assert!(matches!(err, KeeperError::Io(_)));
        assert_eq!(std::fs::read(paths.database_file(2)).unwrap(), b"precious bytes");
        assert_eq!(manager.active_database().unwrap().sequence_number, 1);
    }

    #[test]
    fn test_missing_tracked_table_is_not_retryable() {
        let settings = RotationSettings {
            tracked_tables: vec!["ledger".to_string()],
            ..RotationSettings::default()
        };
        let temp_dir = TempDir::new().unwrap();
        let paths = KeeperPaths::with_base_dir(temp_dir.path().to_path_buf());
        let mut manager = RotationManager::new(
            paths.clone(),
            Box::new(default_schema()),
            RotationSettings::default(),
        );
        manager.initialize(None, None).unwrap();
        manager.settings = settings;

        let err = manager.rotate().unwrap_err();
        assert!(matches!(err, KeeperError::Schema { retryable: false, .. }));
        assert!(!err.is_retryable());
        assert!(!paths.database_file(2).exists());
        assert_eq!(manager.active_database().unwrap().sequence_number, 1);
    }

    #[test]
    fn test_recopy_master_tables_merges() {
        let mut settings = RotationSettings::default();
        settings.master_tables = vec!["users".into()];
        let (mut manager, _temp) = create_test_manager(settings);
        manager.initialize(None, None).unwrap();
        seed_master_tables(&manager);
        manager.rotate().unwrap();

        let conn = manager.connection().unwrap();
        conn.execute("DELETE FROM users WHERE username = 'ben'", [])
            .unwrap();
        conn.execute("INSERT INTO users (username) VALUES ('cy')", [])
            .unwrap();

        let stats = manager.recopy_master_tables(&["users".into()]).unwrap();
        assert!(stats.success);
        let count: i64 = manager
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_recopy_rejects_unknown_table() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();
        manager.rotate().unwrap();

        let err = manager
            .recopy_master_tables(&["transactions".into()])
            .unwrap_err();
        assert!(matches!(err, KeeperError::Config(_)));
    }

    #[test]
    fn test_cleanup_never_deletes_active() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();
        for _ in 0..4 {
            manager.rotate().unwrap();
        }

        let deleted = manager.cleanup(2).unwrap();
        assert_eq!(deleted.len(), 3);

        let remaining = manager.list_databases().unwrap();
        assert_eq!(remaining.len(), 2);
        let active = manager.active_database().unwrap();
        assert_eq!(active.sequence_number, 5);
        assert!(active.path.exists());
        assert_eq!(remaining.iter().filter(|d| !d.is_active).count(), 1);
        assert!(deleted.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_cleanup_keep_one_leaves_only_active() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();
        manager.rotate().unwrap();

        manager.cleanup(1).unwrap();
        let remaining = manager.list_databases().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_active);
    }

    #[test]
    fn test_cleanup_rejects_zero() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();
        assert!(matches!(manager.cleanup(0), Err(KeeperError::Config(_))));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut manager, _temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();

        manager.close().unwrap();
        manager.close().unwrap();
        assert!(!manager.is_open());
        assert!(manager.connection().is_err());
    }

    #[test]
    fn test_rotate_busy_while_locked() {
        let (mut manager, temp) = create_test_manager(RotationSettings::default());
        manager.initialize(None, None).unwrap();

        let lock_path = KeeperPaths::with_base_dir(temp.path().to_path_buf()).lock_file();
        let _held = OperationLock::acquire(&lock_path, "backup").unwrap();
        assert!(matches!(manager.rotate(), Err(KeeperError::Busy(_))));
        assert_eq!(manager.list_databases().unwrap().len(), 1);
    }
}
