//! Configuration CLI commands
//!
//! Shows and edits both the rotation settings (`config.json`) and the
//! automatic backup policy (`backup-config.json`).

use clap::{Subcommand, ValueEnum};

use crate::backup::{BackupConfig, BackupFrequency};
use crate::config::paths::KeeperPaths;
use crate::config::settings::{is_valid_identifier, Settings};
use crate::error::{KeeperError, KeeperResult};

use super::format::format_limit;

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show paths, rotation settings and the backup policy
    Show,

    /// Change one setting
    Set {
        /// Setting to change
        #[arg(value_enum)]
        key: ConfigKey,
        /// New value ('off' clears a ceiling)
        value: String,
    },
}

/// Settings editable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Tracked row ceiling of the active file
    MaxRecords,
    /// Byte size ceiling of the active file
    MaxSize,
    /// Comma-separated tables copied into each new file
    MasterTables,
    /// Comma-separated tables counted towards max-records
    TrackedTables,
    /// Default number of files kept by 'db cleanup'
    CleanupKeep,
    /// Turn automatic backups on or off
    AutoBackup,
    /// daily or weekly
    Frequency,
    /// Number of automatic backups to keep
    KeepLastN,
}

/// Handle a config command
pub fn handle_config_command(
    paths: &KeeperPaths,
    settings: &Settings,
    cmd: ConfigCommands,
) -> KeeperResult<()> {
    match cmd {
        ConfigCommands::Show => {
            let backup = BackupConfig::load(paths)?;

            println!("dbkeeper Configuration");
            println!("======================");
            println!("Data directory:     {}", paths.base_dir().display());
            println!("Database directory: {}", paths.databases_dir().display());
            println!("Backup directory:   {}", paths.backup_dir().display());
            println!();
            println!("Rotation:");
            println!(
                "  Max records:    {}",
                format_limit(settings.rotation.limits.max_records, false)
            );
            println!(
                "  Max size:       {}",
                format_limit(settings.rotation.limits.max_size_bytes, true)
            );
            println!("  Master tables:  {}", settings.rotation.master_tables.join(", "));
            println!("  Tracked tables: {}", settings.rotation.tracked_tables.join(", "));
            println!("  Cleanup keep:   {}", settings.rotation.cleanup_keep);
            println!();
            println!("Automatic backups:");
            println!(
                "  Enabled:   {}",
                if backup.auto_backup_enabled { "yes" } else { "no" }
            );
            println!("  Frequency: {}", backup.auto_backup_frequency);
            println!("  Keep last: {}", backup.keep_last_n);
            match backup.last_auto_backup {
                Some(last) => println!("  Last run:  {}", last.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("  Last run:  never"),
            }
        }

        ConfigCommands::Set { key, value } => {
            let mut settings = settings.clone();
            let mut backup = BackupConfig::load(paths)?;

            match key {
                ConfigKey::MaxRecords => settings.rotation.limits.max_records = parse_limit(&value)?,
                ConfigKey::MaxSize => settings.rotation.limits.max_size_bytes = parse_limit(&value)?,
                ConfigKey::MasterTables => settings.rotation.master_tables = parse_tables(&value)?,
                ConfigKey::TrackedTables => settings.rotation.tracked_tables = parse_tables(&value)?,
                ConfigKey::CleanupKeep => settings.rotation.cleanup_keep = parse_number(&value)?,
                ConfigKey::AutoBackup => backup.auto_backup_enabled = parse_switch(&value)?,
                ConfigKey::Frequency => {
                    backup.auto_backup_frequency = value.parse::<BackupFrequency>()?
                }
                ConfigKey::KeepLastN => backup.keep_last_n = parse_number(&value)?,
            }

            match key {
                ConfigKey::AutoBackup | ConfigKey::Frequency | ConfigKey::KeepLastN => {
                    backup.save(paths)?
                }
                _ => settings.save(paths)?,
            }
            println!("Updated {:?} = {}", key, value);
        }
    }

    Ok(())
}

fn parse_limit(value: &str) -> KeeperResult<Option<u64>> {
    if value.eq_ignore_ascii_case("off") || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_number(value).map(Some)
}

fn parse_number<T: std::str::FromStr>(value: &str) -> KeeperResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| KeeperError::Config(format!("Expected a number, got '{}'", value)))
}

fn parse_switch(value: &str) -> KeeperResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(KeeperError::Config(format!(
            "Expected on or off, got '{}'",
            other
        ))),
    }
}

fn parse_tables(value: &str) -> KeeperResult<Vec<String>> {
    let tables: Vec<String> = value
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(bad) = tables.iter().find(|t| !is_valid_identifier(t)) {
        return Err(KeeperError::Config(format!("Invalid table name: {:?}", bad)));
    }
    Ok(tables)
}
