use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use dbkeeper::backup::{BackupConfig, RestoreController};
use dbkeeper::cli::{
    handle_backup_command, handle_config_command, handle_db_command, handle_restore_command,
    AnnounceAndExit, BackupCommands, ConfigCommands, DbCommands, RestoreCommands,
};
use dbkeeper::cli::format::{format_limit, format_size};
use dbkeeper::config::{paths::KeeperPaths, settings::Settings};
use dbkeeper::storage::{default_schema, RotationManager};

#[derive(Parser)]
#[command(
    name = "dbkeeper",
    version,
    about = "Rotating SQLite storage with zip backups and restart-time restore",
    long_about = "dbkeeper keeps an application's SQLite data split across a \
                  sequence of files, snapshots them into zip archives, and \
                  restores an archive the next time it starts."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active database, rotation ceilings and backup state
    Status,

    /// Database file management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Backup management commands
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Show or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Restore scheduling commands
    #[command(subcommand)]
    Restore(RestoreCommands),
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("DBKEEPER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_rotation(paths: &KeeperPaths, settings: &Settings) -> Result<RotationManager> {
    let mut rotation = RotationManager::new(
        paths.clone(),
        Box::new(default_schema()),
        settings.rotation.clone(),
    );
    rotation
        .initialize(None, None)
        .context("failed to open the active database")?;
    Ok(rotation)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let paths = KeeperPaths::new()?;

    // A scheduled restore must run before any database is opened
    let mut restore = RestoreController::new(paths.clone()).with_process_exit(AnnounceAndExit);
    if restore
        .check_and_execute_restore()
        .context("scheduled restore failed")?
    {
        println!("A scheduled restore was applied; your data now matches the selected backup.");
        println!();
    }

    let settings = Settings::load_or_create(&paths)?;

    match cli.command {
        Some(Commands::Status) => {
            let mut rotation = open_rotation(&paths, &settings)?;
            let status = rotation.status()?;
            let files = rotation.list_databases()?;
            let backup = BackupConfig::load(&paths)?;

            println!("dbkeeper Status");
            println!("===============");
            println!("Data directory: {}", paths.base_dir().display());
            println!(
                "Active database: {} ({} of {} files)",
                status.active.filename,
                files.iter().position(|f| f.is_active).map_or(0, |i| i + 1),
                files.len()
            );
            println!(
                "  Tracked rows: {} / {}",
                status.tracked_rows,
                format_limit(status.limits.max_records, false)
            );
            println!(
                "  Size:         {} / {}",
                format_size(status.size_bytes),
                format_limit(status.limits.max_size_bytes, true)
            );
            println!(
                "  Rotation due: {}",
                if status.should_rotate { "yes" } else { "no" }
            );
            println!();
            println!(
                "Automatic backups: {} ({}, keep {})",
                if backup.auto_backup_enabled { "on" } else { "off" },
                backup.auto_backup_frequency,
                backup.keep_last_n
            );
            if restore.has_pending_restore() {
                println!("A restore is scheduled for the next start.");
            }
            rotation.close()?;
        }
        Some(Commands::Db(cmd)) => {
            let mut rotation = open_rotation(&paths, &settings)?;
            handle_db_command(&mut rotation, &settings, cmd)?;
            rotation.close()?;
        }
        Some(Commands::Backup(cmd)) => {
            // Make sure there is something to back up on a fresh install
            open_rotation(&paths, &settings)?.close()?;
            handle_backup_command(&paths, cmd)?;
        }
        Some(Commands::Config(cmd)) => {
            handle_config_command(&paths, &settings, cmd)?;
        }
        Some(Commands::Restore(cmd)) => {
            handle_restore_command(&paths, &mut restore, cmd)?;
        }
        None => {
            println!("dbkeeper - rotating SQLite storage with backups");
            println!();
            println!("Run 'dbkeeper --help' for usage information.");
            println!("Run 'dbkeeper status' to see the active database.");
        }
    }

    Ok(())
}
