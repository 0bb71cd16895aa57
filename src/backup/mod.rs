//! Backup system for dbkeeper
//!
//! Snapshots the database topology into portable zip archives and restores
//! them across a process restart.
//!
//! # Architecture
//!
//! - `BackupManager`: creates archives, lists and prunes automatic backups,
//!   validates archives, persists the automatic backup policy
//! - `AutoBackupScheduler`: takes automatic backups when due
//! - `RestoreController`: schedules a restore, then applies it on the next
//!   start before any database is opened
//!
//! # Archive Format
//!
//! - `databases/database-NNNNNN.db`: every file in the topology
//! - `databases/topology.json`: the topology index
//! - `user-data.json`, `license.json`: optional, when present
//! - `manifest.json`: written last, describes the above
//!
//! # Example
//!
//! ```rust,ignore
//! use dbkeeper::backup::{BackupManager, RestoreController};
//! use dbkeeper::config::KeeperPaths;
//!
//! let paths = KeeperPaths::new()?;
//! let outcome = BackupManager::new(paths.clone()).create_manual_backup(None);
//!
//! // Exits the process; the restore runs on next start
//! let mut restore = RestoreController::new(paths);
//! restore.schedule_restore(&outcome.path.unwrap())?;
//! ```

pub mod archive;
pub mod config;
mod manager;
pub mod manifest;
pub mod progress;
mod restore;
mod scheduler;
mod snapshot;

pub use archive::ValidationReport;
pub use config::{BackupConfig, BackupFrequency};
pub use manager::{AutoBackupInfo, BackupManager, BackupOutcome, BackupReport};
pub use manifest::{BackupManifest, BackupType, ManifestDatabase};
pub use progress::{ProgressEvent, ProgressHub, ProgressPhase, SubscriptionId};
pub use restore::{ExitProcess, ProcessExit, RestoreController, RestorePending, RestoreState};
pub use scheduler::{AutoBackupScheduler, SchedulerHandle, TickOutcome};
