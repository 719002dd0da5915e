//! Manifest types for archive self-description.
//!
//! The manifest is the authoritative mapping between flat archive members
//! and the original remote paths, sizes and modification times. It is
//! written once during backup finalization and read-only thereafter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::errors::{Result, VaultError};

/// Fixed member name of the manifest at the archive root
pub const MANIFEST_FILE_NAME: &str = "_manifest.json";

/// Backup manifest — serialized as `_manifest.json` inside every archive.
/// Property names are PascalCase on disk; aliases accept the camelCase and
/// snake_case spellings on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(
        rename = "BackupToolVersion",
        alias = "backupToolVersion",
        alias = "backup_tool_version",
        default
    )]
    pub tool_version: String,

    #[serde(
        rename = "BackupTimestampUtc",
        alias = "backupTimestampUtc",
        alias = "backup_timestamp_utc"
    )]
    pub backup_timestamp_utc: DateTime<Utc>,

    #[serde(rename = "Files", alias = "files")]
    pub files: Vec<ManifestEntry>,
}

/// Metadata for a single archive member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Original canonical path on the drive, e.g. `/Root/docs/plan.docx`
    #[serde(
        rename = "GoogleDrivePath",
        alias = "googleDrivePath",
        alias = "google_drive_path"
    )]
    pub remote_path: String,

    /// Member name inside the archive: `<remote_id><ext>`
    #[serde(rename = "ArchivePath", alias = "archivePath", alias = "archive_path")]
    pub archive_path: String,

    #[serde(rename = "SizeBytes", alias = "sizeBytes", alias = "size_bytes")]
    pub size_bytes: u64,

    #[serde(
        rename = "GoogleDriveModifiedTime",
        alias = "googleDriveModifiedTime",
        alias = "google_drive_modified_time",
        default
    )]
    pub modified_time: Option<DateTime<Utc>>,
}

impl ManifestEntry {
    /// Extract the remote id from the archive path, i.e. the text before the
    /// first dot. Returns `None` unless it is a non-empty run of letters,
    /// digits, `-` and `_` — anything else cannot be fed back to the drive.
    pub fn remote_id(&self) -> Option<&str> {
        let stem = self
            .archive_path
            .split('.')
            .next()
            .unwrap_or_default();
        let valid = !stem.is_empty()
            && stem
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then_some(stem)
    }

    /// File name component of the original remote path
    pub fn remote_name(&self) -> &str {
        self.remote_path.rsplit('/').next().unwrap_or(&self.remote_path)
    }
}

impl Manifest {
    pub fn new(files: Vec<ManifestEntry>) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            backup_timestamp_utc: Utc::now(),
            files,
        }
    }
}

/// Read `_manifest.json` from a directory
pub fn read_manifest(dir: &Path) -> Result<Manifest> {
    let path = dir.join(MANIFEST_FILE_NAME);
    if !path.exists() {
        return Err(VaultError::ManifestMissing(dir.to_path_buf()));
    }
    let content = std::fs::read_to_string(&path)?;
    serde_json::from_str(&content).map_err(|e| VaultError::ManifestCorrupt(e.to_string()))
}

/// Write `_manifest.json` into a directory as human-readable JSON with
/// entries sorted by remote path
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let mut sorted = manifest.clone();
    sorted.files.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));

    let json = serde_json::to_string_pretty(&sorted)?;
    std::fs::write(dir.join(MANIFEST_FILE_NAME), json)?;
    Ok(())
}
