//! Schema application for newly created database files
//!
//! The application's table definitions live outside this crate; they reach
//! the rotation manager through [`SchemaMigrator`]. On top of whatever the
//! application defines, every file gets a single-row counter table kept up to
//! date by triggers on the tracked tables, so the row ceiling can be checked
//! without scanning.

use rusqlite::{params, Connection, OptionalExtension};

use crate::config::settings::is_valid_identifier;
use crate::error::{KeeperError, KeeperResult};

/// Name of the row counter table installed in every file
pub const ROW_STATS_TABLE: &str = "_keeper_row_stats";

/// Applies the application schema to a fresh, empty database file
pub trait SchemaMigrator: Send + Sync {
    /// Create every table, index and seed row the application expects
    fn apply(&self, conn: &Connection) -> KeeperResult<()>;
}

/// A schema given as a batch of SQL statements
#[derive(Debug, Clone)]
pub struct SqlSchema {
    sql: String,
}

impl SqlSchema {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

impl SchemaMigrator for SqlSchema {
    fn apply(&self, conn: &Connection) -> KeeperResult<()> {
        conn.execute_batch(&self.sql).map_err(|e| KeeperError::Schema {
            message: e.to_string(),
            retryable: true,
        })
    }
}

/// Schema used by the command-line tool
pub fn default_schema() -> SqlSchema {
    SqlSchema::new(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            display_name TEXT,
            role TEXT NOT NULL DEFAULT 'user'
        );
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            parent_id INTEGER
        );
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER,
            category_id INTEGER,
            amount_cents INTEGER NOT NULL,
            memo TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )
}

/// Create the counter table and hook triggers onto every tracked table
///
/// Tracked tables that the schema didn't create are an error: a typo there
/// would silently disable the row ceiling.
pub fn install_row_tracking(conn: &Connection, tracked_tables: &[String]) -> KeeperResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {stats} (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            row_count INTEGER NOT NULL DEFAULT 0
        );
        INSERT OR IGNORE INTO {stats} (id, row_count) VALUES (1, 0);",
        stats = ROW_STATS_TABLE
    ))?;

    let mut initial = 0i64;
    for table in tracked_tables {
        if !is_valid_identifier(table) {
            return Err(KeeperError::Config(format!("Invalid table name: {:?}", table)));
        }
        if !table_exists(conn, table)? {
            return Err(KeeperError::Schema {
                message: format!("tracked table '{}' does not exist", table),
                retryable: false,
            });
        }

        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS _keeper_{t}_ins AFTER INSERT ON \"{t}\"
             BEGIN UPDATE {stats} SET row_count = row_count + 1 WHERE id = 1; END;
             CREATE TRIGGER IF NOT EXISTS _keeper_{t}_del AFTER DELETE ON \"{t}\"
             BEGIN UPDATE {stats} SET row_count = row_count - 1 WHERE id = 1; END;",
            t = table,
            stats = ROW_STATS_TABLE
        ))?;

        // Seed rows written by the schema itself
        initial += conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
            row.get::<_, i64>(0)
        })?;
    }

    conn.execute(
        &format!("UPDATE {} SET row_count = ?1 WHERE id = 1", ROW_STATS_TABLE),
        params![initial],
    )?;

    Ok(())
}

/// Read the tracked row count maintained by the triggers
pub fn tracked_row_count(conn: &Connection) -> KeeperResult<u64> {
    let count: Option<i64> = conn
        .query_row(
            &format!("SELECT row_count FROM {} WHERE id = 1", ROW_STATS_TABLE),
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count.unwrap_or(0).max(0) as u64)
}

/// Current on-disk size of the open database, from page accounting
pub fn database_size_bytes(conn: &Connection) -> KeeperResult<u64> {
    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    Ok((page_count.max(0) as u64) * (page_size.max(0) as u64))
}

/// Whether a table exists in the given schema (`main` or an attached alias)
pub fn table_exists_in(conn: &Connection, schema: &str, table: &str) -> KeeperResult<bool> {
    let sql = format!(
        "SELECT 1 FROM \"{}\".sqlite_master WHERE type = 'table' AND name = ?1",
        schema
    );
    let found: Option<i64> = conn.query_row(&sql, params![table], |row| row.get(0)).optional()?;
    Ok(found.is_some())
}

fn table_exists(conn: &Connection, table: &str) -> KeeperResult<bool> {
    table_exists_in(conn, "main", table)
}

/// Column names of a table in the given schema, in declaration order
pub fn table_columns(conn: &Connection, schema: &str, table: &str) -> KeeperResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA \"{}\".table_info(\"{}\")", schema, table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}
