//! Resume-state journal for restores.
//!
//! `_restore_state.json` lives inside the temporary extraction directory and
//! records which archive members have been confirmed uploaded. A restore
//! interrupted at any point resumes from it without re-uploading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::utils::errors::Result;

/// Journal file name inside the extraction directory
pub const STATE_FILE_NAME: &str = "_restore_state.json";

/// Settings snapshot captured when a restore starts. On resume these values
/// win over the ambient configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSettings {
    #[serde(
        rename = "RestoreParentId",
        alias = "restoreParentId",
        alias = "restore_parent_id"
    )]
    pub restore_parent_id: String,

    #[serde(
        rename = "MaxParallelTasks",
        alias = "maxParallelTasks",
        alias = "max_parallel_tasks"
    )]
    pub max_parallel_tasks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreState {
    #[serde(rename = "SettingsUsed", alias = "settingsUsed", alias = "settings_used")]
    pub settings_used: RestoreSettings,

    #[serde(
        rename = "CompletedArchivePaths",
        alias = "completedArchivePaths",
        alias = "completed_archive_paths",
        default
    )]
    pub completed_archive_paths: Vec<String>,

    #[serde(
        rename = "RestoreInitiatedTimestampUtc",
        alias = "restoreInitiatedTimestampUtc",
        alias = "restore_initiated_timestamp_utc"
    )]
    pub restore_initiated_timestamp_utc: DateTime<Utc>,

    #[serde(
        rename = "OriginalBackupArchivePath",
        alias = "originalBackupArchivePath",
        alias = "original_backup_archive_path"
    )]
    pub original_backup_archive_path: PathBuf,
}

impl RestoreState {
    pub fn new(settings: RestoreSettings, original_archive: &Path) -> Self {
        Self {
            settings_used: settings,
            completed_archive_paths: Vec::new(),
            restore_initiated_timestamp_utc: Utc::now(),
            original_backup_archive_path: original_archive.to_path_buf(),
        }
    }

    /// Case-insensitive membership test
    pub fn is_completed(&self, archive_path: &str) -> bool {
        self.completed_archive_paths
            .iter()
            .any(|p| p.eq_ignore_ascii_case(archive_path))
    }

    /// Add a completed member, deduplicating case-insensitively and
    /// preserving the first-seen spelling
    pub fn mark_completed(&mut self, archive_path: &str) {
        if !self.is_completed(archive_path) {
            self.completed_archive_paths.push(archive_path.to_string());
        }
    }
}

/// Owns the journal path and serializes writers through its own mutex, so a
/// save is idempotent and never races another save.
pub struct StateStore {
    path: PathBuf,
    state: Mutex<RestoreState>,
}

impl StateStore {
    pub fn new(dir: &Path, state: RestoreState) -> Self {
        Self {
            path: dir.join(STATE_FILE_NAME),
            state: Mutex::new(state),
        }
    }

    /// Load the journal from a resume directory; `Ok(None)` when absent
    pub fn load(dir: &Path) -> Result<Option<RestoreState>> {
        let path = dir.join(STATE_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub async fn snapshot(&self) -> RestoreState {
        self.state.lock().await.clone()
    }

    /// Merge newly completed members into the journal and persist it.
    /// Deliberately free of cancellation checks: this is the best-effort
    /// save that must run even while the operation is unwinding.
    pub async fn merge_and_save(&self, newly_completed: Vec<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        for path in newly_completed {
            state.mark_completed(&path);
        }
        write_state(&self.path, &state)
    }

    pub async fn save(&self) -> Result<()> {
        let state = self.state.lock().await;
        write_state(&self.path, &state)
    }
}

fn write_state(path: &Path, state: &RestoreState) -> Result<()> {
    let mut sorted = state.clone();
    sorted
        .completed_archive_paths
        .sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));

    let json = serde_json::to_string_pretty(&sorted)?;
    std::fs::write(path, json)?;
    Ok(())
}
