//! Zip archive reading and writing
//!
//! Archives hold `databases/<file>` entries, optional root-level user data and
//! license entries, and `manifest.json`, which is always written last.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::paths::parse_database_file_name;
use crate::error::{KeeperError, KeeperResult};

use super::manifest::{
    BackupManifest, DATABASES_PREFIX, LICENSE_ENTRY, MANIFEST_ENTRY, USER_DATA_ENTRY,
};
use super::progress::{ProgressHub, ProgressPhase};

/// Refuse archives with more entries than this
pub const MAX_ARCHIVE_ENTRIES: usize = 10_000;

/// Refuse archives that would expand beyond this many bytes
pub const MAX_UNCOMPRESSED_BYTES: u64 = 64 * 1024 * 1024 * 1024;

/// Flag entries that expand suspiciously
const SUSPICIOUS_COMPRESSION_RATIO: f64 = 1000.0;

const CHUNK_SIZE: usize = 64 * 1024;

/// A file to put into an archive
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    /// Name inside the archive
    pub entry: String,
    /// File on disk
    pub path: PathBuf,
}

/// Write `sources` and then the manifest into a zip at `target`
///
/// Emits `Archiving` progress per file. Returns the archive size in bytes.
pub fn write_archive(
    target: &Path,
    sources: &[ArchiveSource],
    manifest: &BackupManifest,
    progress: &ProgressHub,
) -> KeeperResult<u64> {
    let file = File::create(target).map_err(|e| {
        KeeperError::Io(format!(
            "Failed to create archive {}: {}",
            target.display(),
            e
        ))
    })?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let total = sources.len().max(1);
    for (i, source) in sources.iter().enumerate() {
        progress.report(
            ProgressPhase::Archiving,
            (i as f32 / total as f32) * 90.0,
            Some(&source.entry),
        );

        let size = fs::metadata(&source.path)
            .map_err(|e| {
                KeeperError::Io(format!(
                    "Failed to stat {}: {}",
                    source.path.display(),
                    e
                ))
            })?
            .len();
        let entry_options = options.large_file(size > u32::MAX as u64);

        zip.start_file(source.entry.as_str(), entry_options)?;
        let reader = File::open(&source.path).map_err(|e| {
            KeeperError::Io(format!(
                "Failed to open {}: {}",
                source.path.display(),
                e
            ))
        })?;
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, reader);
        io::copy(&mut reader, &mut zip).map_err(|e| {
            KeeperError::Archive(format!("Failed to write entry {}: {}", source.entry, e))
        })?;
        debug!(entry = %source.entry, size, "archived");
    }

    progress.report(ProgressPhase::Finalizing, 95.0, Some(MANIFEST_ENTRY));
    zip.start_file(MANIFEST_ENTRY, options)?;
    let manifest_json = serde_json::to_vec_pretty(manifest)?;
    zip.write_all(&manifest_json)
        .map_err(|e| KeeperError::Archive(format!("Failed to write manifest: {}", e)))?;

    let file = zip.finish()?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}

/// Open an archive for reading
pub fn open_archive(path: &Path) -> KeeperResult<ZipArchive<File>> {
    if !path.exists() {
        return Err(KeeperError::backup_not_found(path.display().to_string()));
    }
    let file = File::open(path)
        .map_err(|e| KeeperError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    ZipArchive::new(file).map_err(|e| {
        KeeperError::Validation(format!("{} is not a readable zip archive: {}", path.display(), e))
    })
}

/// Read the manifest entry without touching anything else
pub fn read_manifest(archive: &mut ZipArchive<File>) -> KeeperResult<BackupManifest> {
    let mut entry = archive.by_name(MANIFEST_ENTRY).map_err(|_| {
        KeeperError::Validation(format!("Archive has no {} entry", MANIFEST_ENTRY))
    })?;
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents)?;
    serde_json::from_slice(&contents)
        .map_err(|e| KeeperError::Validation(format!("Manifest is not valid: {}", e)))
}

/// Where an archive entry belongs on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// `databases/<name>`, a single path component
    Database(String),
    /// Root-level user data or license file
    Extra(String),
    Manifest,
    /// Anything else, ignored on restore
    Other,
    /// Absolute, parent-escaping or nested database path
    Unsafe,
}

/// Classify an archive entry by name
pub fn classify_entry(name: &str) -> EntryKind {
    if name == MANIFEST_ENTRY {
        return EntryKind::Manifest;
    }
    if name == USER_DATA_ENTRY || name == LICENSE_ENTRY {
        return EntryKind::Extra(name.to_string());
    }
    if let Some(rest) = name.strip_prefix(DATABASES_PREFIX) {
        if rest.is_empty() {
            return EntryKind::Other;
        }
        if rest.contains('/') || rest.contains('\\') || rest == "." || rest == ".." {
            return EntryKind::Unsafe;
        }
        return EntryKind::Database(rest.to_string());
    }
    if name.starts_with('/') || name.split(['/', '\\']).any(|c| c == "..") {
        return EntryKind::Unsafe;
    }
    EntryKind::Other
}

/// Outcome of inspecting an archive without extracting it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: Option<BackupManifest>,
}

impl ValidationReport {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Convert a failed report into a validation error
    pub fn into_result(self) -> KeeperResult<BackupManifest> {
        match (self.is_valid, self.metadata) {
            (true, Some(manifest)) => Ok(manifest),
            _ => Err(KeeperError::Validation(if self.errors.is_empty() {
                "Archive has no manifest".to_string()
            } else {
                self.errors.join("; ")
            })),
        }
    }
}

/// Inspect an archive: manifest, version, database entries, entry safety,
/// size limits and free space at `restore_dir`. Never writes anything.
pub fn validate_archive(path: &Path, restore_dir: &Path) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut archive = match open_archive(path) {
        Ok(archive) => archive,
        Err(e) => {
            report.error(e.to_string());
            return report;
        }
    };

    if archive.len() > MAX_ARCHIVE_ENTRIES {
        report.error(format!(
            "Archive has {} entries, more than the limit of {}",
            archive.len(),
            MAX_ARCHIVE_ENTRIES
        ));
        return report;
    }

    let mut database_entries: Vec<(String, u64)> = Vec::new();
    let mut total_uncompressed: u64 = 0;
    for i in 0..archive.len() {
        let entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                report.error(format!("Entry {} is unreadable: {}", i, e));
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        total_uncompressed = total_uncompressed.saturating_add(entry.size());
        if entry.compressed_size() > 0 {
            let ratio = entry.size() as f64 / entry.compressed_size() as f64;
            if ratio > SUSPICIOUS_COMPRESSION_RATIO {
                report.warning(format!(
                    "Entry {} has an unusual compression ratio of {:.0}:1",
                    name, ratio
                ));
            }
        }

        if entry.enclosed_name().is_none() {
            report.error(format!("Entry {} has an unsafe path", name));
            continue;
        }
        match classify_entry(&name) {
            EntryKind::Database(file) => {
                if parse_database_file_name(&file).is_some() {
                    database_entries.push((file, entry.size()));
                }
            }
            EntryKind::Unsafe => report.error(format!("Entry {} has an unsafe path", name)),
            EntryKind::Other => report.warning(format!("Entry {} will be ignored on restore", name)),
            EntryKind::Extra(_) | EntryKind::Manifest => {}
        }
    }

    if total_uncompressed > MAX_UNCOMPRESSED_BYTES {
        report.error(format!(
            "Archive expands to {} bytes, more than the limit of {}",
            total_uncompressed, MAX_UNCOMPRESSED_BYTES
        ));
    }

    if database_entries.is_empty() {
        report.error("Archive contains no database entries");
    }

    match read_manifest(&mut archive) {
        Ok(manifest) => {
            if !manifest.is_compatible() {
                report.error(format!(
                    "Backup format version {} is not supported",
                    manifest.version
                ));
            }
            for db in &manifest.databases {
                match database_entries.iter().find(|(f, _)| *f == db.filename) {
                    None => report.error(format!(
                        "Manifest lists {} but the archive does not contain it",
                        db.filename
                    )),
                    Some((_, size)) if *size != db.size => report.error(format!(
                        "{} is {} bytes in the archive but {} in the manifest",
                        db.filename, size, db.size
                    )),
                    Some(_) => {}
                }
            }
            for (file, _) in &database_entries {
                if !manifest.databases.iter().any(|d| d.filename == *file) {
                    report.warning(format!("{} is not listed in the manifest", file));
                }
            }
            if manifest.active_database().is_none() {
                report.warning("Manifest does not mark any database as active");
            }
            report.metadata = Some(manifest);
        }
        Err(e) => report.error(e.to_string()),
    }

    match available_space(restore_dir) {
        Ok(available) if available < total_uncompressed => report.error(format!(
            "Not enough disk space: {} bytes needed, {} available",
            total_uncompressed, available
        )),
        Ok(_) => {}
        Err(e) => report.warning(format!("Could not determine free disk space: {}", e)),
    }

    report.is_valid = report.errors.is_empty();
    report
}

/// Free bytes on the filesystem holding `path` (or its nearest existing parent)
pub fn available_space(path: &Path) -> io::Result<u64> {
    let mut existing = path;
    while !existing.exists() {
        existing = match existing.parent() {
            Some(parent) => parent,
            None => break,
        };
    }
    fs2::available_space(existing)
}

/// Extract every database entry into `databases_dir` and extras into `extras_dir`
///
/// Returns the written paths. Emits `Extracting` progress per entry.
pub fn extract_archive(
    archive: &mut ZipArchive<File>,
    databases_dir: &Path,
    extras_dir: &Path,
    progress: &ProgressHub,
) -> KeeperResult<Vec<PathBuf>> {
    fs::create_dir_all(databases_dir)?;

    let total = archive.len().max(1);
    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();

        let target = match classify_entry(&name) {
            EntryKind::Database(file) => databases_dir.join(file),
            EntryKind::Extra(file) => extras_dir.join(file),
            EntryKind::Manifest | EntryKind::Other => continue,
            EntryKind::Unsafe => {
                warn!(entry = %name, "skipping unsafe archive entry");
                continue;
            }
        };

        progress.report(
            ProgressPhase::Extracting,
            10.0 + (i as f32 / total as f32) * 85.0,
            Some(&name),
        );

        let mut out = File::create(&target).map_err(|e| {
            KeeperError::Io(format!("Failed to create {}: {}", target.display(), e))
        })?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| KeeperError::Io(format!("Failed to extract {}: {}", name, e)))?;
        out.sync_all()?;
        debug!(entry = %name, target = %target.display(), "extracted");
        written.push(target);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manifest::{BackupType, ManifestDatabase};
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_archive(dir: &Path, manifest_size: u64) -> PathBuf {
        let db = dir.join("database-000001.db");
        fs::write(&db, vec![7u8; 100]).unwrap();

        let manifest = BackupManifest::new(
            BackupType::Manual,
            Utc::now(),
            vec![ManifestDatabase {
                filename: "database-000001.db".into(),
                size: manifest_size,
                is_active: true,
            }],
            false,
            false,
        );
        let target = dir.join("backup.zip");
        write_archive(
            &target,
            &[ArchiveSource {
                entry: "databases/database-000001.db".into(),
                path: db,
            }],
            &manifest,
            &ProgressHub::new(),
        )
        .unwrap();
        target
    }

    #[test]
    fn test_classify_entry() {
        assert_eq!(
            classify_entry("databases/database-000001.db"),
            EntryKind::Database("database-000001.db".into())
        );
        assert_eq!(classify_entry("manifest.json"), EntryKind::Manifest);
        assert_eq!(
            classify_entry("license.json"),
            EntryKind::Extra("license.json".into())
        );
        assert_eq!(classify_entry("databases/nested/x.db"), EntryKind::Unsafe);
        assert_eq!(classify_entry("databases/.."), EntryKind::Unsafe);
        assert_eq!(classify_entry("../evil"), EntryKind::Unsafe);
        assert_eq!(classify_entry("notes/readme.txt"), EntryKind::Other);
    }

    #[test]
    fn test_valid_archive() {
        let temp = TempDir::new().unwrap();
        let archive = sample_archive(temp.path(), 100);

        let report = validate_archive(&archive, temp.path());
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.metadata.unwrap().databases.len(), 1);
    }

    #[test]
    fn test_size_mismatch_is_error() {
        let temp = TempDir::new().unwrap();
        let archive = sample_archive(temp.path(), 999);

        let report = validate_archive(&archive, temp.path());
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("999")));
    }

    #[test]
    fn test_missing_archive() {
        let temp = TempDir::new().unwrap();
        let report = validate_archive(&temp.path().join("nope.zip"), temp.path());
        assert!(!report.is_valid);
        assert!(report.metadata.is_none());
        assert!(report.into_result().unwrap_err().is_validation());
    }

    #[test]
    fn test_not_a_zip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fake.zip");
        fs::write(&path, b"definitely not a zip").unwrap();

        let report = validate_archive(&path, temp.path());
        assert!(!report.is_valid);
    }

    #[test]
    fn test_archive_without_databases() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.zip");
        let manifest = BackupManifest::new(BackupType::Auto, Utc::now(), vec![], false, false);
        write_archive(&path, &[], &manifest, &ProgressHub::new()).unwrap();

        let report = validate_archive(&path, temp.path());
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("no database entries")));
    }

    #[test]
    fn test_extract_writes_databases() {
        let temp = TempDir::new().unwrap();
        let archive_path = sample_archive(temp.path(), 100);
        let out = temp.path().join("restored");

        let mut archive = open_archive(&archive_path).unwrap();
        let written = extract_archive(&mut archive, &out, temp.path(), &ProgressHub::new()).unwrap();

        assert_eq!(written, vec![out.join("database-000001.db")]);
        assert_eq!(fs::read(&written[0]).unwrap(), vec![7u8; 100]);
    }

    #[test]
    fn test_available_space_walks_up() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("a").join("b");
        assert!(available_space(&missing).unwrap() > 0);
    }
}
