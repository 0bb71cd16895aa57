//! Restore CLI commands

use std::io::Write;

use clap::Subcommand;

use crate::backup::{BackupManager, ExitProcess, ProcessExit, RestoreController};
use crate::config::paths::KeeperPaths;
use crate::error::{KeeperError, KeeperResult};

use super::backup::resolve_backup_path;

/// Restore subcommands
#[derive(Subcommand)]
pub enum RestoreCommands {
    /// Restore a backup on the next start; exits immediately
    Schedule {
        /// Backup filename or path (use 'latest' for most recent automatic backup)
        backup: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Cancel a scheduled restore
    Cancel,

    /// Show whether a restore is scheduled
    Status,
}

/// Tells the user how to apply the restore, then exits
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnounceAndExit;

impl ProcessExit for AnnounceAndExit {
    fn terminate(&self) {
        println!("Restore scheduled. Start dbkeeper again to apply it.");
        let _ = std::io::stdout().flush();
        ExitProcess.terminate();
    }
}

/// Handle a restore command
pub fn handle_restore_command(
    paths: &KeeperPaths,
    restore: &mut RestoreController,
    cmd: RestoreCommands,
) -> KeeperResult<()> {
    match cmd {
        RestoreCommands::Schedule { backup, force } => {
            let manager = BackupManager::new(paths.clone());
            let backup_path = resolve_backup_path(&manager, paths, &backup)?;

            let report = manager.validate_backup(&backup_path);
            let Some(manifest) = report.metadata.as_ref().filter(|_| report.is_valid) else {
                for error in &report.errors {
                    println!("error: {}", error);
                }
                return Err(KeeperError::Validation(format!(
                    "{} cannot be restored",
                    backup_path.display()
                )));
            };

            println!("Backup Information");
            println!("==================");
            println!("File: {}", backup_path.display());
            println!(
                "Created: {}",
                manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("Databases: {}", manifest.databases.len());
            println!();

            if !force {
                println!("WARNING: This will replace ALL current databases on the next start!");
                println!("To proceed, run again with --force flag:");
                println!("  dbkeeper restore schedule {} --force", backup);
                return Ok(());
            }

            // Safety net in case the restored data turns out to be wrong
            if paths.databases_dir().exists() {
                println!("Creating backup of current data before restore...");
                let outcome = manager.create_manual_backup(None);
                match (outcome.success, outcome.path) {
                    (true, Some(path)) => println!("Pre-restore backup saved: {}", path.display()),
                    _ => println!(
                        "Pre-restore backup skipped: {}",
                        outcome.error.unwrap_or_default()
                    ),
                }
            }

            // Announced by the process exit hook once the marker is written
            restore.schedule_restore(&backup_path)?;
        }

        RestoreCommands::Cancel => {
            if restore.cancel_pending_restore()? {
                println!("Scheduled restore cancelled.");
            } else {
                println!("No restore is scheduled.");
            }
        }

        RestoreCommands::Status => match restore.pending_restore()? {
            Some(pending) => {
                println!("Restore scheduled");
                println!("  Backup:       {}", pending.backup_path.display());
                println!(
                    "  Scheduled at: {}",
                    pending.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            None => println!("No restore is scheduled (state: {}).", restore.state()),
        },
    }

    Ok(())
}
