//! drive-vault
//!
//! Backup, restore and repair of a Google Drive subtree using flat,
//! self-describing zip archives.

pub mod archive;
pub mod config;
pub mod engine;
pub mod executor;
pub mod remote;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::VaultError;
pub type Result<T> = std::result::Result<T, VaultError>;
