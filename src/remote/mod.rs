//! Remote-drive port.
//!
//! The engines talk to the cloud drive exclusively through the
//! [`RemoteDrive`] trait; the concrete HTTP adapter lives in [`http`] and an
//! in-memory drive for engine tests lives in [`fake`].

pub mod fetcher;
pub mod http;
pub mod mime;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use thiserror::Error;

use crate::utils::errors::VaultError;

/// MIME type the drive uses to mark folders
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Metadata of one remote file or folder as returned by the drive
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Opaque, stable item id
    pub id: String,
    /// Display name; may contain any Unicode
    pub name: String,
    pub is_folder: bool,
    /// 0 for folders and native documents without a binary size
    pub size_bytes: u64,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
}

/// A listed item with its canonical path inside the backup subtree,
/// computed during traversal. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    /// Canonical slash-delimited path including the root name, e.g. `/Root/a.txt`
    pub path: String,
    pub is_folder: bool,
    pub size_bytes: u64,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
}

impl RemoteItem {
    pub fn from_file(file: RemoteFile, path: String) -> Self {
        Self {
            id: file.id,
            name: file.name,
            path,
            is_folder: file.is_folder,
            size_bytes: file.size_bytes,
            mime_type: file.mime_type,
            modified_time: file.modified_time,
        }
    }
}

/// One page of a folder listing
#[derive(Debug, Default)]
pub struct ListPage {
    pub items: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

/// Remote failures, classified for the retry policy. The engines depend on
/// this classification and nothing else about the transport.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Worth retrying: HTTP 429/500/502/503, connection resets, timeouts
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// Not worth retrying: not-found, permission denied, bad requests
    #[error("permanent remote failure: {0}")]
    Permanent(String),

    /// Local disk exhausted while sinking a download; never retried
    #[error("disk full: {0}")]
    DiskFull(String),
}

impl RemoteError {
    /// Classify an HTTP status into transient vs permanent
    pub fn from_http_status(status: u16, detail: impl Into<String>) -> Self {
        match status {
            429 | 500 | 502 | 503 => RemoteError::Transient(detail.into()),
            _ => RemoteError::Permanent(detail.into()),
        }
    }

    /// Whether the drive reported the item as missing or inaccessible.
    /// Used to make a missing backup root fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Permanent(msg)
            if msg.contains("404") || msg.contains("403") || msg.contains("not found"))
    }
}

impl From<RemoteError> for VaultError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transient(msg) => VaultError::TransientRemote(msg),
            RemoteError::Permanent(msg) => VaultError::PermanentRemote(msg),
            RemoteError::DiskFull(msg) => VaultError::DiskFull(msg),
        }
    }
}

/// Capability set the engines consume. Every method is a suspension point;
/// implementations must be safe to call from concurrent workers.
#[async_trait]
pub trait RemoteDrive: Send + Sync {
    /// List one page of the direct children of a folder
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError>;

    /// Fetch metadata for a single item
    async fn get_meta(&self, file_id: &str) -> Result<RemoteFile, RemoteError>;

    /// Download a binary file as-is into `dest`, returning the byte count
    async fn download_native(&self, file_id: &str, dest: &Path) -> Result<u64, RemoteError>;

    /// Export a drive-native document as `export_mime` into `dest`
    async fn export(&self, file_id: &str, export_mime: &str, dest: &Path)
        -> Result<u64, RemoteError>;

    /// Find a direct child folder by name, if one exists
    async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<String>, RemoteError>;

    /// Create a child folder and return its id
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, RemoteError>;

    /// Upload a local file, returning the confirmed remote metadata
    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime: &str,
        source: &Path,
    ) -> Result<RemoteFile, RemoteError>;
}
