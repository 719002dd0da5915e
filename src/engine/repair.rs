//! Repair engine: rebuild a damaged archive by re-fetching missing members.
//!
//! The archive is extracted, every manifest entry is checked against the
//! extraction, and members that are gone are re-fetched from the drive by
//! the id encoded in their archive path. A repaired archive is emitted only
//! when every missing member could be recovered; an intact archive is left
//! untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::archive::manifest::{read_manifest, Manifest, ManifestEntry};
use crate::archive::{create_archive, extract_archive};
use crate::engine::{utc_stamp, OpContext, OpCounters, RepairOutcome};
use crate::remote::fetcher::RemoteFetcher;
use crate::remote::{RemoteDrive, RemoteItem};
use crate::utils::errors::{Result, VaultError};

/// Inputs for one repair run
#[derive(Debug, Clone)]
pub struct RepairRequest {
    /// Candidate-damaged archive
    pub archive: PathBuf,
    /// Fallback output directory when the original archive has no parent
    pub archive_output_dir: PathBuf,
    pub temp_dir: PathBuf,
}

pub struct RepairEngine {
    drive: Arc<dyn RemoteDrive>,
    fetcher: Arc<RemoteFetcher>,
}

impl RepairEngine {
    pub fn new(drive: Arc<dyn RemoteDrive>) -> Self {
        let fetcher = Arc::new(RemoteFetcher::new(Arc::clone(&drive)));
        Self { drive, fetcher }
    }

    pub async fn execute(&self, ctx: Arc<OpContext>, request: RepairRequest) -> Result<RepairOutcome> {
        let start = Instant::now();
        let stamp = utc_stamp();
        let extract_dir = request.temp_dir.join(format!("repair_extract_{stamp}"));

        let result = self
            .run_phases(&ctx, &request, &stamp, &extract_dir)
            .await;

        cleanup_dir(&extract_dir);

        let counters = ctx.counters.snapshot();
        let duration = start.elapsed();

        match result {
            Ok((repair_attempted, overall_success, repaired_archive)) => {
                info!(
                    "Repair finished in {:.1}s: {} ok, {} missing, {} refetched, {} failed, {} without usable id",
                    duration.as_secs_f64(),
                    counters.files_found_ok,
                    counters.files_missing,
                    counters.successful_downloads,
                    counters.failed_downloads,
                    counters.repairs_skipped_no_id,
                );
                Ok(RepairOutcome {
                    repair_attempted,
                    overall_success,
                    cancelled: false,
                    duration,
                    counters,
                    repaired_archive,
                })
            }
            Err(VaultError::Cancelled) => {
                info!("Repair cancelled after {:.1}s", duration.as_secs_f64());
                Ok(RepairOutcome {
                    repair_attempted: false,
                    overall_success: false,
                    cancelled: true,
                    duration,
                    counters,
                    repaired_archive: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn run_phases(
        &self,
        ctx: &Arc<OpContext>,
        request: &RepairRequest,
        stamp: &str,
        extract_dir: &Path,
    ) -> Result<(bool, bool, Option<PathBuf>)> {
        ctx.check_cancelled()?;

        // Phase 1: extraction and manifest read. An unreadable archive or
        // manifest means the repair cannot even be attempted.
        let manifest = match self.load_archive(&request.archive, extract_dir).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(
                    "Cannot repair {}: {}",
                    request.archive.display(),
                    e
                );
                return Ok((false, false, None));
            }
        };

        // Phase 2: check every manifest entry against the extraction
        let mut refetch: Vec<(ManifestEntry, String)> = Vec::new();
        for entry in &manifest.files {
            if extract_dir.join(&entry.archive_path).is_file() {
                OpCounters::bump(&ctx.counters.files_found_ok);
                continue;
            }

            OpCounters::bump(&ctx.counters.files_missing);
            match entry.remote_id() {
                Some(id) => refetch.push((entry.clone(), id.to_string())),
                None => {
                    warn!(
                        "Missing member {} has no usable remote id; cannot repair it",
                        entry.archive_path
                    );
                    OpCounters::bump(&ctx.counters.repairs_skipped_no_id);
                }
            }
        }

        let missing = ctx.counters.snapshot().files_missing;
        if missing == 0 {
            info!(
                "Archive {} is intact ({} members); nothing to repair",
                request.archive.display(),
                manifest.files.len()
            );
            return Ok((false, true, None));
        }
        info!("{} of {} members missing; re-fetching", missing, manifest.files.len());

        // Phase 3: parallel refetch of every member with a usable id
        let jobs: Vec<_> = refetch
            .into_iter()
            .map(|(entry, id)| {
                let ctx = Arc::clone(ctx);
                let drive = Arc::clone(&self.drive);
                let fetcher = Arc::clone(&self.fetcher);
                let dest = extract_dir.join(&entry.archive_path);
                async move {
                    refetch_member(&ctx, &drive, &fetcher, entry, id, dest).await;
                }
            })
            .collect();
        ctx.runner().run(jobs).await;
        ctx.check_cancelled()?;

        // Phase 4: emit a repaired archive only when every missing member
        // was recovered
        let counters = ctx.counters.snapshot();
        if counters.failed_downloads > 0 || counters.repairs_skipped_no_id > 0 {
            warn!(
                "Repair incomplete ({} failed, {} without id); not emitting a repaired archive",
                counters.failed_downloads, counters.repairs_skipped_no_id
            );
            return Ok((true, false, None));
        }

        let output_dir = request
            .archive
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| request.archive_output_dir.clone());
        let stem = request
            .archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "archive".to_string());
        let repaired_path = output_dir.join(format!("{stem}_REPAIRED_{stamp}.zip"));

        let src = extract_dir.to_path_buf();
        let dst = repaired_path.clone();
        tokio::task::spawn_blocking(move || create_archive(&src, &dst))
            .await
            .map_err(|e| VaultError::LocalIo(std::io::Error::other(e)))??;

        info!("Repaired archive emitted: {}", repaired_path.display());
        Ok((true, true, Some(repaired_path)))
    }

    async fn load_archive(&self, archive: &Path, extract_dir: &Path) -> Result<Manifest> {
        let archive_owned = archive.to_path_buf();
        let dir_owned = extract_dir.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Manifest> {
            extract_archive(&archive_owned, &dir_owned)?;
            read_manifest(&dir_owned)
        })
        .await
        .map_err(|e| VaultError::LocalIo(std::io::Error::other(e)))?
    }
}

/// Re-fetch one missing member: look up its current MIME type, rebuild a
/// listing item from the manifest fields and hand it to the shared fetcher.
async fn refetch_member(
    ctx: &OpContext,
    drive: &Arc<dyn RemoteDrive>,
    fetcher: &RemoteFetcher,
    entry: ManifestEntry,
    id: String,
    dest: PathBuf,
) {
    let meta = match drive.get_meta(&id).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!("Metadata lookup failed for {} ({}): {}", entry.archive_path, id, e);
            OpCounters::bump(&ctx.counters.failed_downloads);
            return;
        }
    };

    let item = RemoteItem {
        id,
        name: entry.remote_name().to_string(),
        path: entry.remote_path.clone(),
        is_folder: false,
        size_bytes: entry.size_bytes,
        mime_type: meta.mime_type,
        modified_time: entry.modified_time,
    };

    match fetcher.fetch(ctx, &item, &dest).await {
        Ok(bytes) => info!("Recovered {} ({} bytes)", entry.archive_path, bytes),
        Err(VaultError::Cancelled) => (),
        Err(e) => warn!("Could not recover {}: {}", entry.archive_path, e),
    }
}

fn cleanup_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Could not remove temp dir {}: {}", dir.display(), e);
        }
    }
}
