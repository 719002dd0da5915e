//! Restore engine: upload an archive's contents back to the drive.
//!
//! A fresh restore extracts the archive into a temp directory and journals
//! progress there; an interrupted restore resumes from that directory and
//! never re-uploads confirmed members. Folder materialization completes
//! before any uploads start.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::extract_archive;
use crate::archive::manifest::{read_manifest, Manifest, ManifestEntry};
use crate::archive::restore_state::{RestoreSettings, RestoreState, StateStore};
use crate::engine::{utc_stamp, OpContext, OpCounters, RestoreOutcome};
use crate::remote::fetcher::{retry_backoff, MAX_DOWNLOAD_ATTEMPTS};
use crate::remote::mime::mime_for_file_name;
use crate::remote::RemoteDrive;
use crate::utils::errors::{Result, VaultError};

/// Ambient settings for a fresh restore. On resume the journal's snapshot
/// of these wins; differences are logged.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub restore_parent_id: String,
    pub max_parallel_tasks: i64,
    pub temp_dir: PathBuf,
}

/// What to restore: a fresh archive or a preserved resume directory
#[derive(Debug, Clone)]
pub enum RestoreRequest {
    Fresh { archive: PathBuf },
    Resume { dir: PathBuf },
}

/// Relative folder path → remote folder id for the current restore.
/// Keys are lowercased and slash-trimmed; the empty key is the restore
/// parent. Entries are only ever added.
struct FolderIdCache {
    root_id: String,
    map: RwLock<HashMap<String, String>>,
    /// Serializes find-or-create so concurrent requests for the same path
    /// cannot create duplicate sibling folders
    create_lock: Mutex<()>,
}

impl FolderIdCache {
    fn new(parent_id: &str) -> Self {
        Self {
            root_id: parent_id.to_string(),
            map: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    fn cache_key(relative_path: &str) -> String {
        relative_path.trim_matches('/').to_lowercase()
    }

    /// Resolve a relative folder path to its remote id, creating missing
    /// folders segment by segment. Lookups fold case; remote calls use the
    /// original spelling.
    async fn ensure_path(
        &self,
        ctx: &OpContext,
        drive: &Arc<dyn RemoteDrive>,
        relative_path: &str,
    ) -> Result<String> {
        let key = Self::cache_key(relative_path);
        if key.is_empty() {
            return Ok(self.root_id.clone());
        }
        if let Some(id) = self.map.read().await.get(&key) {
            return Ok(id.clone());
        }

        let _guard = self.create_lock.lock().await;

        // Another worker may have filled the entry while we waited
        if let Some(id) = self.map.read().await.get(&key) {
            return Ok(id.clone());
        }

        let mut child_key = String::new();
        let mut parent_id = self.root_id.clone();

        for segment in relative_path.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            ctx.check_cancelled()?;

            if !child_key.is_empty() {
                child_key.push('/');
            }
            child_key.push_str(&segment.to_lowercase());

            let child_id = match self.map.read().await.get(&child_key) {
                Some(id) => id.clone(),
                None => {
                    let id = match drive.find_child_folder(&parent_id, segment).await? {
                        Some(existing) => existing,
                        None => {
                            let created = drive.create_folder(&parent_id, segment).await?;
                            OpCounters::bump(&ctx.counters.folders_created);
                            info!("Created remote folder {segment} ({created})");
                            created
                        }
                    };
                    self.map.write().await.insert(child_key.clone(), id.clone());
                    id
                }
            };

            parent_id = child_id;
        }

        Ok(parent_id)
    }
}

/// Directory component of a manifest entry's remote path, slash-trimmed.
/// `/Root/docs/plan.docx` → `Root/docs`; a root-level file → `Root`.
fn folder_path_of(remote_path: &str) -> String {
    let trimmed = remote_path.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((dir, _file)) => dir.to_string(),
        None => String::new(),
    }
}

pub struct RestoreEngine {
    drive: Arc<dyn RemoteDrive>,
}

impl RestoreEngine {
    pub fn new(drive: Arc<dyn RemoteDrive>) -> Self {
        Self { drive }
    }

    /// Run a restore to completion, cancellation or failure. The extraction
    /// directory is deleted only after a fully clean run; every other exit
    /// preserves it together with the journal so the restore can resume.
    pub async fn execute(
        &self,
        cancel: CancellationToken,
        options: &RestoreOptions,
        request: RestoreRequest,
    ) -> Result<RestoreOutcome> {
        let start = Instant::now();

        let (extract_dir, manifest, state) = self.prepare(options, &request).await?;
        let settings = state.settings_used.clone();
        let ctx = Arc::new(OpContext::new(settings.max_parallel_tasks, cancel));

        let completed: HashSet<String> = state
            .completed_archive_paths
            .iter()
            .map(|p| p.to_lowercase())
            .collect();
        let store = Arc::new(StateStore::new(&extract_dir, state));

        let newly_completed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let phase_result = self
            .run_phases(&ctx, &settings, &extract_dir, &manifest, &completed, &newly_completed)
            .await;

        // Best-effort journal save on every path, including cancellation
        // and fatal errors; the save itself is not cancellable.
        let gathered = {
            let mut bag = newly_completed.lock().await;
            std::mem::take(&mut *bag)
        };
        if let Err(e) = store.merge_and_save(gathered).await {
            warn!("Could not persist restore state: {}", e);
        }

        let counters = ctx.counters.snapshot();
        let duration = start.elapsed();
        let manifest_count = manifest.files.len() as u64;

        match phase_result {
            Ok(()) => {
                let success = counters.files_skipped == 0
                    && counters.files_uploaded + counters.files_already_done == manifest_count;
                info!(
                    "Restore finished ({}) in {:.1}s: {} uploaded, {} already done, {} skipped of {}",
                    if success { "clean" } else { "dirty" },
                    duration.as_secs_f64(),
                    counters.files_uploaded,
                    counters.files_already_done,
                    counters.files_skipped,
                    manifest_count,
                );

                let resume_dir = if success {
                    cleanup_dir(&extract_dir);
                    None
                } else {
                    Some(extract_dir)
                };
                Ok(RestoreOutcome {
                    success,
                    cancelled: false,
                    duration,
                    counters,
                    resume_dir,
                })
            }
            Err(VaultError::Cancelled) => {
                info!(
                    "Restore cancelled after {:.1}s; resume from {}",
                    duration.as_secs_f64(),
                    extract_dir.display()
                );
                Ok(RestoreOutcome {
                    success: false,
                    cancelled: true,
                    duration,
                    counters,
                    resume_dir: Some(extract_dir),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Set up the extraction directory, manifest and journal for either a
    /// fresh or a resumed restore
    async fn prepare(
        &self,
        options: &RestoreOptions,
        request: &RestoreRequest,
    ) -> Result<(PathBuf, Manifest, RestoreState)> {
        match request {
            RestoreRequest::Fresh { archive } => {
                if options.restore_parent_id.is_empty() {
                    return Err(VaultError::Config(
                        "remote_restore_parent_id is required for a fresh restore".into(),
                    ));
                }

                let extract_dir = options.temp_dir.join(format!("restore_{}", utc_stamp()));
                tokio::fs::create_dir_all(&extract_dir).await?;

                let archive_owned = archive.clone();
                let dir_owned = extract_dir.clone();
                let extracted = tokio::task::spawn_blocking(move || -> Result<Manifest> {
                    extract_archive(&archive_owned, &dir_owned)?;
                    read_manifest(&dir_owned)
                })
                .await
                .map_err(|e| VaultError::LocalIo(std::io::Error::other(e)))?;

                // A directory without a journal cannot be resumed; do not
                // leave one behind when extraction or the manifest fails.
                let manifest = match extracted {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        cleanup_dir(&extract_dir);
                        return Err(e);
                    }
                };

                let settings = RestoreSettings {
                    restore_parent_id: options.restore_parent_id.clone(),
                    max_parallel_tasks: options.max_parallel_tasks,
                };
                let state = RestoreState::new(settings, archive);
                let store = StateStore::new(&extract_dir, state.clone());
                store.save().await?;

                info!(
                    "Fresh restore of {} with {} members",
                    archive.display(),
                    manifest.files.len()
                );
                Ok((extract_dir, manifest, state))
            }

            RestoreRequest::Resume { dir } => {
                let state = StateStore::load(dir)?.ok_or_else(|| {
                    VaultError::Config(format!(
                        "{} is not a resumable restore directory",
                        dir.display()
                    ))
                })?;
                let manifest = read_manifest(dir)?;

                // The journal's settings snapshot wins over the ambient
                // configuration; only warn about drift.
                if state.settings_used.restore_parent_id != options.restore_parent_id
                    && !options.restore_parent_id.is_empty()
                {
                    warn!(
                        "Resume uses restore parent {} from the journal (configuration now says {})",
                        state.settings_used.restore_parent_id, options.restore_parent_id
                    );
                }
                if state.settings_used.max_parallel_tasks != options.max_parallel_tasks {
                    warn!(
                        "Resume uses {} parallel tasks from the journal (configuration now says {})",
                        state.settings_used.max_parallel_tasks, options.max_parallel_tasks
                    );
                }

                info!(
                    "Resuming restore of {} ({} of {} members already done)",
                    state.original_backup_archive_path.display(),
                    state.completed_archive_paths.len(),
                    manifest.files.len()
                );
                Ok((dir.clone(), manifest, state))
            }
        }
    }

    async fn run_phases(
        &self,
        ctx: &Arc<OpContext>,
        settings: &RestoreSettings,
        extract_dir: &Path,
        manifest: &Manifest,
        completed: &HashSet<String>,
        newly_completed: &Arc<Mutex<Vec<String>>>,
    ) -> Result<()> {
        // Phase 1: folder materialization, parents before children
        let cache = Arc::new(FolderIdCache::new(&settings.restore_parent_id));
        let mut folder_paths: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for entry in &manifest.files {
            let folder = folder_path_of(&entry.remote_path);
            if seen.insert(folder.to_lowercase()) {
                folder_paths.push(folder);
            }
        }
        folder_paths.sort_by_key(|p| p.len());

        for folder in &folder_paths {
            ctx.check_cancelled()?;
            self.ensure_logged(ctx, &cache, folder).await?;
        }
        info!("Folder tree materialized: {} paths", folder_paths.len());

        // Phase 2: bounded parallel uploads
        let mut jobs = Vec::new();
        for entry in &manifest.files {
            if completed.contains(&entry.archive_path.to_lowercase()) {
                OpCounters::bump(&ctx.counters.files_already_done);
                continue;
            }

            let local = extract_dir.join(&entry.archive_path);
            if !local.exists() {
                warn!(
                    "Archive member {} missing from extraction; skipping",
                    entry.archive_path
                );
                OpCounters::bump(&ctx.counters.files_skipped);
                continue;
            }

            let ctx = Arc::clone(ctx);
            let drive = Arc::clone(&self.drive);
            let cache = Arc::clone(&cache);
            let newly_completed = Arc::clone(newly_completed);
            let entry = entry.clone();
            jobs.push(async move {
                upload_member(&ctx, &drive, &cache, &entry, local, newly_completed).await;
            });
        }
        ctx.runner().run(jobs).await;
        ctx.check_cancelled()?;

        Ok(())
    }

    async fn ensure_logged(
        &self,
        ctx: &Arc<OpContext>,
        cache: &Arc<FolderIdCache>,
        folder: &str,
    ) -> Result<String> {
        cache.ensure_path(ctx, &self.drive, folder).await.map_err(|e| {
            warn!("Could not materialize folder {}: {}", folder, e);
            e
        })
    }
}

/// One upload unit of work, with the operation retry policy. A confirmed
/// upload is recorded in the thread-safe bag; the journal itself is only
/// written during state finalization.
async fn upload_member(
    ctx: &OpContext,
    drive: &Arc<dyn RemoteDrive>,
    cache: &FolderIdCache,
    entry: &ManifestEntry,
    local: PathBuf,
    newly_completed: Arc<Mutex<Vec<String>>>,
) {
    let folder = folder_path_of(&entry.remote_path);
    let parent_id = match cache.ensure_path(ctx, drive, &folder).await {
        Ok(id) => id,
        Err(VaultError::Cancelled) => return,
        Err(e) => {
            warn!("No parent folder for {}: {}", entry.remote_path, e);
            OpCounters::bump(&ctx.counters.failed_uploads);
            return;
        }
    };

    let name = entry.remote_name();
    let mime = mime_for_file_name(name);

    for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
        if ctx.check_cancelled().is_err() {
            return;
        }
        OpCounters::bump(&ctx.counters.upload_attempts);

        match drive.upload(&parent_id, name, mime, &local).await {
            Ok(confirmed) => {
                OpCounters::bump(&ctx.counters.files_uploaded);
                OpCounters::add(&ctx.counters.bytes_uploaded, confirmed.size_bytes);
                newly_completed.lock().await.push(entry.archive_path.clone());
                return;
            }
            Err(err) => {
                let err: VaultError = err.into();
                let retryable = err.is_retryable() && attempt < MAX_DOWNLOAD_ATTEMPTS;
                warn!(
                    "Upload attempt {}/{} failed for {}: {}{}",
                    attempt,
                    MAX_DOWNLOAD_ATTEMPTS,
                    entry.remote_path,
                    err,
                    if retryable { ", retrying" } else { "" }
                );
                if !retryable {
                    break;
                }
                if retry_backoff(ctx).await.is_err() {
                    return;
                }
            }
        }
    }

    OpCounters::bump(&ctx.counters.failed_uploads);
}

fn cleanup_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Could not remove temp dir {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::create_archive;
    use crate::archive::manifest::write_manifest;
    use crate::archive::restore_state::STATE_FILE_NAME;
    use crate::remote::fake::FakeDrive;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(remote_path: &str, archive_path: &str, size: u64) -> ManifestEntry {
        ManifestEntry {
            remote_path: remote_path.to_string(),
            archive_path: archive_path.to_string(),
            size_bytes: size,
            modified_time: Some(Utc::now()),
        }
    }

    /// Build an archive whose members and manifest describe `files`
    fn build_archive(work: &TempDir, files: &[(&str, &str, &[u8])]) -> PathBuf {
        let staging = work.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();

        let mut entries = Vec::new();
        for (remote_path, archive_path, content) in files {
            std::fs::write(staging.join(archive_path), content).unwrap();
            entries.push(entry(remote_path, archive_path, content.len() as u64));
        }
        write_manifest(&staging, &Manifest::new(entries)).unwrap();

        let archive = work.path().join("backup.zip");
        create_archive(&staging, &archive).unwrap();
        std::fs::remove_dir_all(&staging).unwrap();
        archive
    }

    fn options(work: &TempDir, parallel: i64) -> RestoreOptions {
        RestoreOptions {
            restore_parent_id: "restore-parent".to_string(),
            max_parallel_tasks: parallel,
            temp_dir: work.path().join("tmp"),
        }
    }

    #[test]
    fn folder_component_extraction() {
        assert_eq!(folder_path_of("/Root/docs/plan.docx"), "Root/docs");
        assert_eq!(folder_path_of("/Root/a.txt"), "Root");
        assert_eq!(folder_path_of("loose.txt"), "");
    }

    #[tokio::test]
    async fn fresh_restore_uploads_all_members_under_one_root() {
        let work = TempDir::new().unwrap();
        let archive = build_archive(
            &work,
            &[
                ("/Root/a.txt", "X1.txt", b"0123456789"),
                ("/Root/doc", "X2.docx", b"exported"),
            ],
        );

        let drive = Arc::new(FakeDrive::new("drive-root"));
        let engine = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);
        let outcome = engine
            .execute(
                CancellationToken::new(),
                &options(&work, 2),
                RestoreRequest::Fresh { archive },
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.resume_dir.is_none());
        assert_eq!(outcome.counters.files_uploaded, 2);
        assert_eq!(outcome.counters.files_skipped, 0);

        // Exactly one "Root" folder under the restore parent
        let roots = drive.child_folders("restore-parent");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].1, "Root");

        let mut uploads = drive.uploads();
        uploads.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].name, "a.txt");
        assert_eq!(uploads[0].mime, "text/plain");
        assert_eq!(uploads[0].content, b"0123456789");
        assert_eq!(uploads[1].name, "doc");
        assert_eq!(uploads[1].mime, "application/octet-stream");
    }

    #[tokio::test]
    async fn nested_folders_are_created_once_each() {
        let work = TempDir::new().unwrap();
        let archive = build_archive(
            &work,
            &[
                ("/Root/A/f1.txt", "i1.txt", b"1"),
                ("/Root/A/f2.txt", "i2.txt", b"2"),
                ("/Root/A/B/f3.txt", "i3.txt", b"3"),
                ("/Root/f4.txt", "i4.txt", b"4"),
            ],
        );

        let drive = Arc::new(FakeDrive::new("drive-root"));
        let engine = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);
        let outcome = engine
            .execute(
                CancellationToken::new(),
                &options(&work, 4),
                RestoreRequest::Fresh { archive },
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.counters.folders_created, 3); // Root, A, B

        let roots = drive.child_folders("restore-parent");
        assert_eq!(roots.len(), 1);
        let under_root = drive.child_folders(&roots[0].0);
        assert_eq!(under_root.iter().filter(|(_, n)| n == "A").count(), 1);
    }

    #[tokio::test]
    async fn resume_skips_confirmed_members() {
        // First run confirms X1 but fails X2; the resumed run uploads
        // only X2.
        let work = TempDir::new().unwrap();
        let archive = build_archive(
            &work,
            &[
                ("/Root/a.txt", "X1.txt", b"first"),
                ("/Root/b.txt", "X2.txt", b"second"),
            ],
        );

        let drive = Arc::new(FakeDrive::new("drive-root"));
        drive.fail_uploads("b.txt", 99, false);

        let engine = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);
        let first = engine
            .execute(
                CancellationToken::new(),
                &options(&work, 1),
                RestoreRequest::Fresh { archive },
            )
            .await
            .unwrap();

        assert!(!first.success);
        assert_eq!(first.counters.files_uploaded, 1);
        assert_eq!(first.counters.failed_uploads, 1);
        let resume_dir = first.resume_dir.unwrap();

        // The journal recorded exactly the confirmed member
        let state = StateStore::load(&resume_dir).unwrap().unwrap();
        assert_eq!(state.completed_archive_paths, vec!["X1.txt"]);

        drive.fail_uploads("b.txt", 0, false);
        let second = engine
            .execute(
                CancellationToken::new(),
                &options(&work, 1),
                RestoreRequest::Resume { dir: resume_dir },
            )
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(second.counters.files_already_done, 1);
        assert_eq!(second.counters.files_uploaded, 1);

        // No duplicate upload of a.txt across the two runs
        let uploads = drive.uploads();
        assert_eq!(
            uploads.iter().filter(|u| u.name == "a.txt").count(),
            1
        );
        assert_eq!(
            uploads.iter().filter(|u| u.name == "b.txt").count(),
            1
        );
    }

    #[tokio::test]
    async fn resume_prefers_journal_settings() {
        let work = TempDir::new().unwrap();
        let archive = build_archive(&work, &[("/Root/a.txt", "X1.txt", b"x")]);

        let drive = Arc::new(FakeDrive::new("drive-root"));
        drive.fail_uploads("a.txt", 99, false);

        let engine = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);
        let first = engine
            .execute(
                CancellationToken::new(),
                &options(&work, 3),
                RestoreRequest::Fresh { archive },
            )
            .await
            .unwrap();
        let resume_dir = first.resume_dir.unwrap();

        drive.fail_uploads("a.txt", 0, false);

        // Ambient settings changed between runs; the journal's win
        let drifted = RestoreOptions {
            restore_parent_id: "other-parent".to_string(),
            max_parallel_tasks: 9,
            temp_dir: work.path().join("tmp"),
        };
        let second = engine
            .execute(
                CancellationToken::new(),
                &drifted,
                RestoreRequest::Resume { dir: resume_dir },
            )
            .await
            .unwrap();
        assert!(second.success);

        // Uploaded under the journal's parent, not the drifted one
        assert_eq!(drive.child_folders("restore-parent").len(), 1);
        assert!(drive.child_folders("other-parent").is_empty());
    }

    #[tokio::test]
    async fn missing_members_count_as_skipped_and_preserve_the_directory() {
        let work = TempDir::new().unwrap();
        let archive = build_archive(&work, &[("/Root/a.txt", "X1.txt", b"x")]);

        let drive = Arc::new(FakeDrive::new("drive-root"));
        let engine = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);

        // Extract manually, delete the member, then resume from the
        // mutilated directory.
        let dir = work.path().join("mutilated");
        extract_archive(&archive, &dir).unwrap();
        let state = RestoreState::new(
            RestoreSettings {
                restore_parent_id: "restore-parent".to_string(),
                max_parallel_tasks: 1,
            },
            &archive,
        );
        StateStore::new(&dir, state).save().await.unwrap();
        std::fs::remove_file(dir.join("X1.txt")).unwrap();

        let outcome = engine
            .execute(
                CancellationToken::new(),
                &options(&work, 1),
                RestoreRequest::Resume { dir: dir.clone() },
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.counters.files_skipped, 1);
        assert_eq!(outcome.resume_dir, Some(dir.clone()));
        assert!(dir.join(STATE_FILE_NAME).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_upload_failures_are_retried() {
        let work = TempDir::new().unwrap();
        let archive = build_archive(&work, &[("/Root/a.txt", "X1.txt", b"x")]);

        let drive = Arc::new(FakeDrive::new("drive-root"));
        drive.fail_uploads("a.txt", 2, true);

        let engine = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);
        let outcome = engine
            .execute(
                CancellationToken::new(),
                &options(&work, 1),
                RestoreRequest::Fresh { archive },
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.counters.upload_attempts, 3);
        assert_eq!(outcome.counters.files_uploaded, 1);
        assert_eq!(outcome.counters.failed_uploads, 0);
    }

    #[tokio::test]
    async fn cancellation_preserves_journal_and_directory() {
        let work = TempDir::new().unwrap();
        let archive = build_archive(&work, &[("/Root/a.txt", "X1.txt", b"x")]);

        let drive = Arc::new(FakeDrive::new("drive-root"));
        let engine = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = engine
            .execute(cancel, &options(&work, 1), RestoreRequest::Fresh { archive })
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert!(!outcome.success);
        let resume_dir = outcome.resume_dir.unwrap();
        assert!(resume_dir.join(STATE_FILE_NAME).exists());
        assert!(resume_dir.join("X1.txt").exists());
        assert!(drive.uploads().is_empty());
    }

    #[tokio::test]
    async fn fresh_restore_without_parent_id_is_rejected() {
        let work = TempDir::new().unwrap();
        let archive = build_archive(&work, &[("/Root/a.txt", "X1.txt", b"x")]);

        let drive = Arc::new(FakeDrive::new("drive-root"));
        let engine = RestoreEngine::new(drive as Arc<dyn RemoteDrive>);

        let mut opts = options(&work, 1);
        opts.restore_parent_id = String::new();
        let err = engine
            .execute(
                CancellationToken::new(),
                &opts,
                RestoreRequest::Fresh { archive },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }
}
