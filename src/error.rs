//! Custom error types for dbkeeper
//!
//! This module defines the error hierarchy for the durability layer using
//! thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for dbkeeper operations
#[derive(Error, Debug)]
pub enum KeeperError {
    /// Configuration-related errors (invalid retention, frequency, limits)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors (permission, disk full, file busy)
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Archive missing, corrupt, or of an incompatible version
    #[error("Validation error: {0}")]
    Validation(String),

    /// SQLite errors
    #[error("Database error: {0}")]
    Database(String),

    /// Applying the schema to a freshly created file failed
    #[error("Schema error: {message}")]
    Schema { message: String, retryable: bool },

    /// Zip read/write errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// One or more master tables failed to replicate during rotation
    #[error("Master table copy failed for: {}", tables.join(", "))]
    PartialCopy { tables: Vec<String> },

    /// Restore failed after the live database directory was already wiped
    #[error("Restore failed after the database directory was cleared: {0}")]
    FatalExtraction(String),

    /// Another rotation or backup holds the operation lock
    #[error("Operation in progress: {0}")]
    Busy(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },
}

impl KeeperError {
    /// Create a "not found" error for backups
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for database files
    pub fn database_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Database",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Schema { retryable, .. } => *retryable,
            Self::Busy(_) | Self::PartialCopy { .. } => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for KeeperError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for KeeperError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<zip::result::ZipError> for KeeperError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Result type alias for dbkeeper operations
pub type KeeperResult<T> = Result<T, KeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeeperError::Config("keep_last_n must be at least 1".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: keep_last_n must be at least 1"
        );
    }

    #[test]
    fn test_not_found_error() {
        let err = KeeperError::backup_not_found("latest");
        assert_eq!(err.to_string(), "Backup not found: latest");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_partial_copy_lists_tables() {
        let err = KeeperError::PartialCopy {
            tables: vec!["users".into(), "settings".into()],
        };
        assert_eq!(
            err.to_string(),
            "Master table copy failed for: users, settings"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_schema_retryable_flag() {
        let err = KeeperError::Schema {
            message: "near \"CRATE\": syntax error".into(),
            retryable: true,
        };
        assert!(err.is_retryable());
        assert!(!KeeperError::FatalExtraction("disk full".into()).is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let keeper_err: KeeperError = io_err.into();
        assert!(matches!(keeper_err, KeeperError::Io(_)));
    }
}
