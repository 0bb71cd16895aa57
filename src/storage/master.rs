//! Master table replication between database files
//!
//! At rotation time the full contents of every master table are copied from
//! the retiring file into the new one. Each table is copied in its own
//! transaction: a failure is recorded and the remaining tables still get
//! copied.

use std::path::Path;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::settings::is_valid_identifier;
use crate::error::{KeeperError, KeeperResult};

use super::schema::{table_columns, table_exists_in};

const SOURCE_ALIAS: &str = "keeper_src";

/// Rows copied for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopy {
    pub table: String,
    pub records: u64,
}

/// A table that failed to copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopyError {
    pub table: String,
    pub error: String,
}

/// Outcome of replicating all master tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyStats {
    pub success: bool,
    pub copied: Vec<TableCopy>,
    pub errors: Vec<TableCopyError>,
}

impl CopyStats {
    /// Names of the tables that failed to copy
    pub fn failed_tables(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.table.clone()).collect()
    }

    /// Total rows copied across all tables
    pub fn total_records(&self) -> u64 {
        self.copied.iter().map(|c| c.records).sum()
    }
}

/// How rows already present in the target table are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Target table ends up identical to the source (rotation)
    Replace,
    /// Source rows are added, existing target rows win (retrying a failed copy)
    Merge,
}

/// Copy `tables` from the database at `source` into `target`
///
/// The source file is only read. Failures are per table and never abort
/// the remaining copies.
pub fn copy_master_tables(
    target: &Connection,
    source: &Path,
    tables: &[String],
    mode: CopyMode,
) -> KeeperResult<CopyStats> {
    if !source.exists() {
        return Err(KeeperError::database_not_found(source.display().to_string()));
    }
    let source_str = source
        .to_str()
        .ok_or_else(|| KeeperError::Io(format!("Non UTF-8 database path: {:?}", source)))?;

    target.execute(
        &format!("ATTACH DATABASE ?1 AS {}", SOURCE_ALIAS),
        params![source_str],
    )?;

    let mut stats = CopyStats::default();
    for table in tables {
        match copy_table(target, table, mode) {
            Ok(records) => {
                debug!(table = %table, records, "master table copied");
                stats.copied.push(TableCopy {
                    table: table.clone(),
                    records,
                });
            }
            Err(e) => {
                error!(table = %table, error = %e, "master table copy failed");
                stats.errors.push(TableCopyError {
                    table: table.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    stats.success = stats.errors.is_empty();

    target.execute(&format!("DETACH DATABASE {}", SOURCE_ALIAS), [])?;

    Ok(stats)
}

fn copy_table(target: &Connection, table: &str, mode: CopyMode) -> KeeperResult<u64> {
    if !is_valid_identifier(table) {
        return Err(KeeperError::Config(format!("Invalid table name: {:?}", table)));
    }
    if !table_exists_in(target, SOURCE_ALIAS, table)? {
        return Err(KeeperError::Validation(format!(
            "table '{}' does not exist in the source database",
            table
        )));
    }
    if !table_exists_in(target, "main", table)? {
        return Err(KeeperError::Validation(format!(
            "table '{}' does not exist in the new database",
            table
        )));
    }

    // Only columns both sides know about, in the target's order
    let source_columns = table_columns(target, SOURCE_ALIAS, table)?;
    let columns: Vec<String> = table_columns(target, "main", table)?
        .into_iter()
        .filter(|c| source_columns.contains(c))
        .collect();
    if columns.is_empty() {
        return Err(KeeperError::Validation(format!(
            "table '{}' has no columns in common between source and target",
            table
        )));
    }
    let column_list = columns
        .iter()
        .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(", ");

    let tx = target.unchecked_transaction()?;
    let insert = match mode {
        CopyMode::Replace => {
            tx.execute(&format!("DELETE FROM main.\"{}\"", table), [])?;
            "INSERT"
        }
        CopyMode::Merge => "INSERT OR IGNORE",
    };
    let records = tx.execute(
        &format!(
            "{insert} INTO main.\"{t}\" ({cols}) SELECT {cols} FROM {src}.\"{t}\"",
            insert = insert,
            t = table,
            cols = column_list,
            src = SOURCE_ALIAS
        ),
        [],
    )?;
    tx.commit()?;

    Ok(records as u64)
}
