//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the library.

pub mod backup;
pub mod config;
pub mod db;
pub mod format;
pub mod restore;

pub use backup::{handle_backup_command, BackupCommands};
pub use config::{handle_config_command, ConfigCommands};
pub use db::{handle_db_command, DbCommands};
pub use restore::{handle_restore_command, AnnounceAndExit, RestoreCommands};
