//! Custom error types for drive-vault.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Backup root unavailable: {0}")]
    RootUnavailable(String),

    #[error("No manifest found in {0}")]
    ManifestMissing(PathBuf),

    #[error("Manifest corrupt: {0}")]
    ManifestCorrupt(String),

    #[error("Archive member missing: {0}")]
    MemberMissing(String),

    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    #[error("Permanent remote error: {0}")]
    PermanentRemote(String),

    #[error("Disk full: {0}")]
    DiskFull(String),

    #[error("I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("Invalid archive path: {0}")]
    InvalidArchivePath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl VaultError {
    /// Whether the download/upload retry loop may re-attempt after this error.
    /// Disk-full, permanent remote failures and cancellation are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::TransientRemote(_) | VaultError::LocalIo(_))
    }

    /// Map an I/O error, promoting out-of-space conditions to `DiskFull`
    /// so they bypass the retry loop.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded => {
                VaultError::DiskFull(err.to_string())
            }
            _ => VaultError::LocalIo(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
