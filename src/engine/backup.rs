//! Backup engine: mirror a remote subtree into a flat archive.
//!
//! Five phases, in order: prior-archive prep, breadth-first listing,
//! analysis, bounded parallel execution, finalization. Listing completes
//! before analysis, analysis before execution, and the manifest is written
//! before the archive is emitted.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::archive::manifest::{read_manifest, write_manifest, Manifest, ManifestEntry};
use crate::archive::{create_archive, extract_archive};
use crate::engine::{times_equivalent, utc_stamp, BackupOutcome, OpContext, OpCounters};
use crate::remote::fetcher::RemoteFetcher;
use crate::remote::mime::{export_for, is_unsupported_native};
use crate::remote::{RemoteDrive, RemoteItem};
use crate::utils::errors::{Result, VaultError};

/// Ordered set of normalized relative paths pruned from the subtree.
/// Comparisons are case-insensitive; an exclusion covers the path itself
/// and everything below it.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    entries: Vec<String>,
}

impl ExclusionSet {
    pub fn new(raw: impl IntoIterator<Item = String>) -> Self {
        let mut entries: Vec<String> = raw
            .into_iter()
            .filter_map(|e| {
                let trimmed = e.trim().trim_matches('/');
                if trimmed.is_empty() {
                    None
                } else {
                    Some(format!("/{}", trimmed.to_lowercase()))
                }
            })
            .collect();
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    /// `relative_path` must begin with `/`
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        let candidate = relative_path.to_lowercase();
        self.entries
            .iter()
            .any(|e| candidate == *e || candidate.starts_with(&format!("{e}/")))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Inputs for one backup run
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Drive folder id whose subtree is mirrored
    pub root_id: String,
    /// Previous archive for incremental copy, if any
    pub prior_archive: Option<PathBuf>,
    pub exclusions: ExclusionSet,
    /// Scratch root for staging and prior extraction
    pub temp_dir: PathBuf,
    /// Where the finished archive lands
    pub output_dir: PathBuf,
}

/// How one listed file is materialized into the archive
#[derive(Debug)]
enum PlanAction {
    /// Download or export via the fetcher
    Fetch,
    /// Copy the member out of the prior archive's extraction
    CopyFromPrior { source: PathBuf },
}

#[derive(Debug)]
struct FilePlan {
    item: RemoteItem,
    archive_path: String,
    action: PlanAction,
}

pub struct BackupEngine {
    drive: Arc<dyn RemoteDrive>,
    fetcher: Arc<RemoteFetcher>,
}

impl BackupEngine {
    pub fn new(drive: Arc<dyn RemoteDrive>) -> Self {
        let fetcher = Arc::new(RemoteFetcher::new(Arc::clone(&drive)));
        Self { drive, fetcher }
    }

    /// Run a full backup; returns a structured outcome with the clean/dirty
    /// flag, cancellation flag and counters. Temp directories are removed on
    /// every exit path.
    pub async fn execute(&self, ctx: Arc<OpContext>, request: BackupRequest) -> Result<BackupOutcome> {
        let start = Instant::now();
        let stamp = utc_stamp();
        let staging_dir = request.temp_dir.join(format!("backup_{stamp}"));
        let old_extract_dir = request.temp_dir.join(format!("oldextract_{stamp}"));

        let result = self
            .run_phases(&ctx, &request, &stamp, &staging_dir, &old_extract_dir)
            .await;

        cleanup_dir(&staging_dir);
        cleanup_dir(&old_extract_dir);

        let counters = ctx.counters.snapshot();
        let duration = start.elapsed();

        match result {
            Ok(archive_path) => {
                let success = counters.failed_downloads == 0 && counters.copy_errors == 0;
                info!(
                    "Backup finished ({}) in {:.1}s: {} listed, {} copied, {} downloaded, {} failed, {} unsupported",
                    if success { "clean" } else { "dirty" },
                    duration.as_secs_f64(),
                    counters.files_listed,
                    counters.files_copied,
                    counters.successful_downloads,
                    counters.failed_downloads,
                    counters.unsupported_skipped,
                );
                Ok(BackupOutcome {
                    success,
                    cancelled: false,
                    duration,
                    counters,
                    archive_path: Some(archive_path),
                })
            }
            Err(VaultError::Cancelled) => {
                info!("Backup cancelled after {:.1}s", duration.as_secs_f64());
                Ok(BackupOutcome {
                    success: false,
                    cancelled: true,
                    duration,
                    counters,
                    archive_path: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn run_phases(
        &self,
        ctx: &Arc<OpContext>,
        request: &BackupRequest,
        stamp: &str,
        staging_dir: &Path,
        old_extract_dir: &Path,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(staging_dir).await?;

        // Phase 1: prior-archive prep. Any failure degrades to a full backup.
        let prior_by_id = match &request.prior_archive {
            Some(archive) => prepare_prior(archive, old_extract_dir).await,
            None => HashMap::new(),
        };

        // Phase 2: breadth-first listing
        let items = self.list_subtree(ctx, &request.root_id, &request.exclusions).await?;
        info!("Listing complete: {} files", items.len());

        // Phase 3: analysis
        let plans = analyze(ctx, items, &prior_by_id, old_extract_dir);
        info!(
            "Analysis complete: {} to materialize, {} unsupported",
            plans.len(),
            ctx.counters.snapshot().unsupported_skipped
        );

        // Phase 4: bounded parallel execution
        let entries: Arc<Mutex<Vec<ManifestEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let jobs: Vec<_> = plans
            .into_iter()
            .map(|plan| {
                let ctx = Arc::clone(ctx);
                let fetcher = Arc::clone(&self.fetcher);
                let entries = Arc::clone(&entries);
                let dest = staging_dir.join(&plan.archive_path);
                async move {
                    materialize_file(&ctx, &fetcher, plan, dest, entries).await;
                }
            })
            .collect();
        ctx.runner().run(jobs).await;
        ctx.check_cancelled()?;

        // Phase 5: finalization. The archive is emitted even on a dirty run
        // so the caller can inspect what was gathered.
        let gathered = {
            let mut bag = entries.lock().await;
            std::mem::take(&mut *bag)
        };
        let manifest = Manifest::new(gathered);
        let staging = staging_dir.to_path_buf();
        let manifest_clone = manifest.clone();
        tokio::task::spawn_blocking(move || write_manifest(&staging, &manifest_clone))
            .await
            .map_err(|e| VaultError::LocalIo(std::io::Error::other(e)))??;

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let archive_path = request.output_dir.join(format!("drive_backup_{stamp}.zip"));
        let staging = staging_dir.to_path_buf();
        let archive = archive_path.clone();
        tokio::task::spawn_blocking(move || create_archive(&staging, &archive))
            .await
            .map_err(|e| VaultError::LocalIo(std::io::Error::other(e)))??;

        info!(
            "Archive emitted: {} ({} members + manifest)",
            archive_path.display(),
            manifest.files.len()
        );
        Ok(archive_path)
    }

    /// Breadth-first traversal of the subtree with exclusion pruning.
    /// A missing or inaccessible root is fatal.
    async fn list_subtree(
        &self,
        ctx: &OpContext,
        root_id: &str,
        exclusions: &ExclusionSet,
    ) -> Result<Vec<RemoteItem>> {
        ctx.check_cancelled()?;

        let root = match self.drive.get_meta(root_id).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                return Err(VaultError::RootUnavailable(root_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        let mut queue: VecDeque<(String, String)> = VecDeque::new();
        queue.push_back((root.id.clone(), String::new()));

        while let Some((folder_id, relative)) = queue.pop_front() {
            let mut page_token: Option<String> = None;
            loop {
                ctx.check_cancelled()?;
                let page = self
                    .drive
                    .list_children(&folder_id, page_token.as_deref())
                    .await?;

                for child in page.items {
                    let child_relative = format!("{}/{}", relative, child.name);
                    if exclusions.is_excluded(&child_relative) {
                        info!("Excluded: {}", child_relative);
                        continue;
                    }

                    if child.is_folder {
                        queue.push_back((child.id.clone(), child_relative));
                    } else {
                        OpCounters::bump(&ctx.counters.files_listed);
                        let path = format!("/{}{}", root.name, child_relative);
                        items.push(RemoteItem::from_file(child, path));
                    }
                }

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }
        }

        Ok(items)
    }
}

/// Extract a prior archive and index its manifest by member id. Returns an
/// empty map when anything goes wrong so the run degrades to a full backup.
async fn prepare_prior(archive: &Path, extract_dir: &Path) -> HashMap<String, ManifestEntry> {
    if !archive.exists() {
        warn!(
            "Prior archive {} not found; running a full backup",
            archive.display()
        );
        return HashMap::new();
    }

    let archive_owned = archive.to_path_buf();
    let extract_owned = extract_dir.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || -> Result<Manifest> {
        extract_archive(&archive_owned, &extract_owned)?;
        read_manifest(&extract_owned)
    })
    .await;

    match loaded {
        Ok(Ok(manifest)) => {
            let mut by_id = HashMap::new();
            for entry in manifest.files {
                if let Some(id) = entry.remote_id() {
                    by_id.insert(id.to_string(), entry);
                }
            }
            info!("Prior archive loaded: {} reusable members", by_id.len());
            by_id
        }
        Ok(Err(e)) => {
            warn!(
                "Prior archive {} unusable ({}); running a full backup",
                archive.display(),
                e
            );
            HashMap::new()
        }
        Err(e) => {
            warn!("Prior archive task failed ({}); running a full backup", e);
            HashMap::new()
        }
    }
}

/// Classify every listed file into a materialization plan
fn analyze(
    ctx: &OpContext,
    items: Vec<RemoteItem>,
    prior_by_id: &HashMap<String, ManifestEntry>,
    old_extract_dir: &Path,
) -> Vec<FilePlan> {
    let mut plans = Vec::with_capacity(items.len());

    for item in items {
        if let Some(mapping) = export_for(&item.mime_type) {
            let archive_path = format!("{}{}", item.id, mapping.extension);
            plans.push(FilePlan {
                item,
                archive_path,
                action: PlanAction::Fetch,
            });
            continue;
        }

        if is_unsupported_native(&item.mime_type) {
            OpCounters::bump(&ctx.counters.unsupported_skipped);
            info!("Skipping unsupported item: {} ({})", item.path, item.mime_type);
            continue;
        }

        let archive_path = format!("{}{}", item.id, extension_of(&item.name));
        let action = match prior_by_id.get(&item.id) {
            Some(prior) if times_equivalent(item.modified_time, prior.modified_time) => {
                PlanAction::CopyFromPrior {
                    source: old_extract_dir.join(&prior.archive_path),
                }
            }
            _ => PlanAction::Fetch,
        };
        plans.push(FilePlan {
            item,
            archive_path,
            action,
        });
    }

    plans
}

/// One execution-phase unit of work: copy or fetch a single member, then
/// record its manifest entry. Failures land in counters, never as errors.
async fn materialize_file(
    ctx: &OpContext,
    fetcher: &RemoteFetcher,
    plan: FilePlan,
    dest: PathBuf,
    entries: Arc<Mutex<Vec<ManifestEntry>>>,
) {
    let bytes = match plan.action {
        PlanAction::CopyFromPrior { source } => {
            match tokio::fs::copy(&source, &dest).await {
                Ok(bytes) => {
                    OpCounters::bump(&ctx.counters.files_copied);
                    OpCounters::add(&ctx.counters.bytes_copied, bytes);
                    Some(bytes)
                }
                Err(e) => {
                    warn!(
                        "Copy of {} from prior archive failed ({}); downloading instead",
                        plan.item.path, e
                    );
                    OpCounters::bump(&ctx.counters.copy_errors);
                    fetch_logged(ctx, fetcher, &plan.item, &dest).await
                }
            }
        }
        PlanAction::Fetch => fetch_logged(ctx, fetcher, &plan.item, &dest).await,
    };

    if let Some(bytes) = bytes {
        let entry = ManifestEntry {
            remote_path: plan.item.path.clone(),
            archive_path: plan.archive_path,
            size_bytes: bytes,
            modified_time: plan.item.modified_time,
        };
        entries.lock().await.push(entry);
    }
}

async fn fetch_logged(
    ctx: &OpContext,
    fetcher: &RemoteFetcher,
    item: &RemoteItem,
    dest: &Path,
) -> Option<u64> {
    match fetcher.fetch(ctx, item, dest).await {
        Ok(bytes) => Some(bytes),
        Err(VaultError::Cancelled) => None,
        Err(e) => {
            error!("Download failed for {}: {}", item.path, e);
            None
        }
    }
}

/// Extension including the leading dot, or empty when the name has none
fn extension_of(name: &str) -> String {
    match Path::new(name).extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    }
}

fn cleanup_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Could not remove temp dir {}: {}", dir.display(), e);
        }
    }
}
