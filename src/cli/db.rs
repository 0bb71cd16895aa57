//! Database CLI commands
//!
//! Inspect the file sequence, force a rotation, retire old files and retry
//! failed master table copies.

use clap::Subcommand;

use crate::config::settings::Settings;
use crate::error::KeeperResult;
use crate::storage::RotationManager;

use super::format::format_size;

/// Database subcommands
#[derive(Subcommand)]
pub enum DbCommands {
    /// List every database file, oldest first
    List,

    /// Split to a new database file
    Rotate {
        /// Rotate even if no ceiling has been reached
        #[arg(short, long)]
        force: bool,
    },

    /// Delete old inactive database files
    Cleanup {
        /// Total number of files to keep, including the active one
        #[arg(short, long)]
        keep: Option<usize>,
    },

    /// Copy master tables again from the previous file
    Recopy {
        /// Tables to copy (defaults to every master table)
        tables: Vec<String>,
    },
}

/// Handle a database command
pub fn handle_db_command(
    rotation: &mut RotationManager,
    settings: &Settings,
    cmd: DbCommands,
) -> KeeperResult<()> {
    match cmd {
        DbCommands::List => {
            let databases = rotation.list_databases()?;

            println!("Database Files");
            println!("==============");
            for db in &databases {
                println!(
                    "  {} {:>10}  created {}{}",
                    db.filename,
                    format_size(db.size_bytes),
                    db.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    if db.is_active { "  [active]" } else { "" },
                );
            }
            println!();
            println!("Total: {} file(s)", databases.len());
        }

        DbCommands::Rotate { force } => {
            if !force && !rotation.should_rotate()? {
                let status = rotation.status()?;
                println!("No ceiling reached; nothing to do.");
                println!(
                    "Active: {} ({} tracked rows, {})",
                    status.active.filename,
                    status.tracked_rows,
                    format_size(status.size_bytes)
                );
                println!("Use --force to rotate anyway.");
                return Ok(());
            }

            let result = rotation.rotate()?;
            println!("Rotated {} -> {}", result.old_database, result.new_database);
            for copy in &result.copy_stats.copied {
                println!("  copied {} ({} rows)", copy.table, copy.records);
            }

            if !result.copy_stats.success {
                println!();
                println!("WARNING: some master tables were not copied:");
                for failure in &result.copy_stats.errors {
                    println!("  {}: {}", failure.table, failure.error);
                }
                println!("Retry with: dbkeeper db recopy {}", result.copy_stats.failed_tables().join(" "));
            }
        }

        DbCommands::Cleanup { keep } => {
            let keep = keep.unwrap_or(settings.rotation.cleanup_keep);
            let deleted = rotation.cleanup(keep)?;

            if deleted.is_empty() {
                println!("Nothing to clean up (keeping {} file(s)).", keep);
            } else {
                for path in &deleted {
                    println!("  deleted {}", path.display());
                }
                println!("Deleted {} file(s).", deleted.len());
            }
        }

        DbCommands::Recopy { tables } => {
            let tables = if tables.is_empty() {
                settings.rotation.master_tables.clone()
            } else {
                tables
            };

            let stats = rotation.recopy_master_tables(&tables)?;
            for copy in &stats.copied {
                println!("  {}: {} row(s) added", copy.table, copy.records);
            }
            for failure in &stats.errors {
                println!("  {}: FAILED ({})", failure.table, failure.error);
            }
            if stats.success {
                println!("All requested master tables copied.");
            }
        }
    }

    Ok(())
}
