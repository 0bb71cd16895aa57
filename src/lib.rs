//! dbkeeper - local data durability for embedded SQLite applications
//!
//! This library keeps an application's SQLite data split across a rotating
//! sequence of files, snapshots that topology into portable zip archives, and
//! restores archives across a process restart.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Path resolution and rotation settings
//! - `error`: Custom error types
//! - `storage`: Rotation manager, topology index, master table copy
//! - `backup`: Archive creation, retention, scheduling and restore
//! - `cli`: Command handlers for the `dbkeeper` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use dbkeeper::backup::RestoreController;
//! use dbkeeper::config::{KeeperPaths, Settings};
//! use dbkeeper::storage::{default_schema, RotationManager};
//!
//! let paths = KeeperPaths::new()?;
//!
//! // Always before any database is opened
//! RestoreController::new(paths.clone()).check_and_execute_restore()?;
//!
//! let settings = Settings::load_or_create(&paths)?;
//! let mut rotation = RotationManager::new(paths, Box::new(default_schema()), settings.rotation);
//! rotation.initialize(None, None)?;
//! if rotation.should_rotate()? {
//!     rotation.rotate()?;
//! }
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod storage;

pub use error::{KeeperError, KeeperResult};
