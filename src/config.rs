//! Configuration management for drive-vault.
//!
//! Loads configuration from a TOML file with serde-supplied defaults and
//! writes it back when backup success timestamps change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::executor::clamp_parallelism;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Drive folder id whose subtree is backed up
    #[serde(default)]
    pub remote_backup_root_id: String,

    /// Drive folder id under which restores are uploaded
    #[serde(default)]
    pub remote_restore_parent_id: String,

    /// Bearer token for the Drive API; the DRIVE_ACCESS_TOKEN environment
    /// variable takes precedence when set
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where finished archives are written
    #[serde(default = "default_archive_output_dir")]
    pub archive_output_dir: PathBuf,

    /// Scratch space for extractions and staging
    #[serde(default = "default_temp_work_dir")]
    pub temp_work_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Informational threshold for external schedulers; not enforced here
    #[serde(default = "default_backup_cycle_hours")]
    pub backup_cycle_hours: u32,

    /// Worker bound for parallel phases; clamped to [1, 10]
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: i64,

    /// Normalized relative paths pruned from the backup subtree
    #[serde(default)]
    pub excluded_relative_paths: Vec<String>,

    /// Stamped after each clean backup
    #[serde(default)]
    pub last_successful_backup_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_archive_output_dir() -> PathBuf {
    PathBuf::from("./archives")
}

fn default_temp_work_dir() -> PathBuf {
    PathBuf::from("./work")
}

fn default_backup_cycle_hours() -> u32 {
    24
}

fn default_max_parallel_tasks() -> i64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the configuration back (used to persist `last_successful_backup_utc`)
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Worker bound with the [1, 10] clamp applied
    pub fn parallel_tasks(&self) -> usize {
        clamp_parallelism(self.backup.max_parallel_tasks)
    }

    /// Create a default configuration
    pub fn default() -> Self {
        Config {
            remote: RemoteConfig {
                remote_backup_root_id: String::new(),
                remote_restore_parent_id: String::new(),
                access_token: None,
            },
            storage: StorageConfig {
                archive_output_dir: default_archive_output_dir(),
                temp_work_dir: default_temp_work_dir(),
            },
            backup: BackupConfig {
                backup_cycle_hours: default_backup_cycle_hours(),
                max_parallel_tasks: default_max_parallel_tasks(),
                excluded_relative_paths: Vec::new(),
                last_successful_backup_utc: None,
            },
            log: LogConfig::default(),
        }
    }
}
