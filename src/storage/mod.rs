//! Storage layer for dbkeeper
//!
//! Provides the rotating SQLite file sequence, the atomically replaced
//! topology index, and the lock that keeps rotation and backup snapshots
//! from overlapping.

pub mod file_io;
pub mod lock;
pub mod master;
pub mod rotation;
pub mod schema;
pub mod topology;

pub use file_io::{read_json_optional, write_json_atomic};
pub use lock::OperationLock;
pub use master::{CopyStats, TableCopy, TableCopyError};
pub use rotation::{RotationManager, RotationResult, RotationStatus};
pub use schema::{default_schema, SchemaMigrator, SqlSchema};
pub use topology::{DatabaseFile, Topology};
