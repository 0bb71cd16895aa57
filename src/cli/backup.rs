//! Backup CLI commands
//!
//! Implements CLI commands for backup management.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;

use crate::backup::{AutoBackupInfo, AutoBackupScheduler, BackupManager, TickOutcome};
use crate::config::paths::KeeperPaths;
use crate::error::{KeeperError, KeeperResult};

use super::format::{format_duration, format_size};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a new backup
    Create {
        /// Output file or directory (default: backups/manual/)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available backups
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a backup archive without restoring it
    Validate {
        /// Backup filename or path (use 'latest' for most recent automatic backup)
        backup: String,
    },

    /// Delete old automatic backups
    Prune {
        /// Number of automatic backups to keep (default: keepLastN)
        #[arg(short, long)]
        keep: Option<u32>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Take an automatic backup now if one is due
    RunScheduled,

    /// Keep running and take automatic backups when due
    Watch {
        /// Seconds between checks
        #[arg(short, long, default_value = "3600")]
        interval: u64,
    },
}

/// Handle a backup command
pub fn handle_backup_command(paths: &KeeperPaths, cmd: BackupCommands) -> KeeperResult<()> {
    let manager = BackupManager::new(paths.clone());

    match cmd {
        BackupCommands::Create { output } => {
            println!("Creating backup...");
            let outcome = manager.create_manual_backup(output.as_deref());
            match (outcome.success, outcome.path) {
                (true, Some(path)) => {
                    let filename = path
                        .file_name()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| path.display().to_string());
                    println!("Backup created: {}", filename);
                    println!("Location: {}", path.display());
                    println!("Size: {}", format_size(outcome.size.unwrap_or(0)));
                }
                _ => {
                    return Err(KeeperError::Archive(
                        outcome.error.unwrap_or_else(|| "backup failed".into()),
                    ));
                }
            }
        }

        BackupCommands::List { verbose } => {
            let auto = manager.list_auto_backups()?;
            let manual = manager.list_manual_backups()?;

            if auto.is_empty() && manual.is_empty() {
                println!("No backups found.");
                println!("Create one with: dbkeeper backup create");
                return Ok(());
            }

            print_backups("Automatic Backups", &auto, verbose);
            print_backups("Manual Backups", &manual, verbose);
            println!("Total: {} backup(s)", auto.len() + manual.len());
        }

        BackupCommands::Validate { backup } => {
            let backup_path = resolve_backup_path(&manager, paths, &backup)?;
            let report = manager.validate_backup(&backup_path);

            println!("Backup Details");
            println!("==============");
            println!("File: {}", backup_path.display());
            if let Some(manifest) = &report.metadata {
                println!(
                    "Created: {}",
                    manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("Type: {}", manifest.backup_type);
                println!("Format version: {}", manifest.version);
                println!("Written by: dbkeeper {}", manifest.app_version);
                println!();
                println!("Contents:");
                for db in &manifest.databases {
                    println!(
                        "  {} {:>10}{}",
                        db.filename,
                        format_size(db.size),
                        if db.is_active { "  [active]" } else { "" }
                    );
                }
                println!(
                    "  User data: {}",
                    if manifest.has_user_data { "Yes" } else { "No" }
                );
                println!(
                    "  License:   {}",
                    if manifest.has_license { "Yes" } else { "No" }
                );
            }
            println!();

            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            for error in &report.errors {
                println!("error: {}", error);
            }
            if report.is_valid {
                println!("Status: Valid");
            } else {
                return Err(KeeperError::Validation(format!(
                    "{} has {} problem(s)",
                    backup_path.display(),
                    report.errors.len()
                )));
            }
        }

        BackupCommands::Prune { keep, force } => {
            let config = manager.load_config()?;
            let keep = keep.unwrap_or(config.keep_last_n);
            let backups = manager.list_auto_backups()?;
            let to_delete = backups.len().saturating_sub(keep as usize);

            if to_delete == 0 {
                println!("No backups to prune.");
                println!(
                    "Keeping {} automatic backup(s); you have {}.",
                    keep,
                    backups.len()
                );
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!("Keep newest: {}", keep);
            println!("Current automatic backups: {}", backups.len());
            println!("To be deleted: {}", to_delete);
            println!();

            if !force {
                println!("To delete old backups, run again with --force flag:");
                println!("  dbkeeper backup prune --force");
                return Ok(());
            }

            let deleted = manager.enforce_retention(keep)?;
            println!("Deleted {} backup(s).", deleted.len());
        }

        BackupCommands::RunScheduled => {
            let scheduler = AutoBackupScheduler::new(manager);
            match scheduler.tick(Utc::now())? {
                TickOutcome::Disabled => {
                    println!("Automatic backups are disabled.");
                    println!("Enable with: dbkeeper config set auto-backup on");
                }
                TickOutcome::NotDue { next_due } => match next_due {
                    Some(next) => println!(
                        "Not due yet; next automatic backup in {}.",
                        format_duration(next - Utc::now())
                    ),
                    None => println!("Not due yet."),
                },
                TickOutcome::BackedUp { report, pruned } => {
                    println!("Automatic backup created: {}", report.path.display());
                    if pruned > 0 {
                        println!("Deleted {} old backup(s).", pruned);
                    }
                }
            }
        }

        BackupCommands::Watch { interval } => {
            let interval = Duration::from_secs(interval.max(1));
            println!(
                "Watching for due automatic backups every {}s (Ctrl-C to stop)...",
                interval.as_secs()
            );
            let _handle = AutoBackupScheduler::new(manager).spawn(interval);
            loop {
                std::thread::park();
            }
        }
    }

    Ok(())
}

fn print_backups(title: &str, backups: &[AutoBackupInfo], verbose: bool) {
    if backups.is_empty() {
        return;
    }

    println!("{}", title);
    println!("{}", "=".repeat(title.len()));
    for (i, backup) in backups.iter().enumerate() {
        let age = format_duration(Utc::now().signed_duration_since(backup.created_at));

        if verbose {
            println!(
                "{}. {}\n   Path: {}\n   Created: {}\n   Size: {}\n   Age: {}\n",
                i + 1,
                backup.filename,
                backup.path.display(),
                backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                format_size(backup.size_bytes),
                age,
            );
        } else {
            println!(
                "  {}. {} ({} ago, {})",
                i + 1,
                backup.filename,
                age,
                format_size(backup.size_bytes),
            );
        }
    }
    println!();
}

/// Resolve a backup identifier to a full path
pub(crate) fn resolve_backup_path(
    manager: &BackupManager,
    paths: &KeeperPaths,
    backup: &str,
) -> KeeperResult<PathBuf> {
    if backup.eq_ignore_ascii_case("latest") {
        return manager
            .get_latest_auto_backup()?
            .map(|b| b.path)
            .ok_or_else(|| KeeperError::backup_not_found("latest"));
    }

    let path = PathBuf::from(backup);
    if path.exists() {
        return Ok(path);
    }

    // Bare filenames are looked up in the backup directories
    for dir in [paths.auto_backup_dir(), paths.manual_backup_dir()] {
        for candidate in [dir.join(backup), dir.join(format!("{}.zip", backup))] {
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    Err(KeeperError::backup_not_found(backup))
}
