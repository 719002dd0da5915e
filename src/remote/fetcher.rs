//! Shared download routine with the operation retry policy.
//!
//! Both the backup and repair engines fetch members through this type, so
//! the retry policy and its counters live in exactly one place.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::{OpContext, OpCounters};
use crate::remote::mime::export_for;
use crate::remote::{RemoteDrive, RemoteItem};
use crate::utils::errors::{Result, VaultError};

/// Attempts per file, including the first
pub const MAX_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Fixed wait between attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(7);

/// Cancellation-aware wait used between retry attempts
pub async fn retry_backoff(ctx: &OpContext) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(RETRY_DELAY) => Ok(()),
        _ = ctx.cancel.cancelled() => Err(VaultError::Cancelled),
    }
}

pub struct RemoteFetcher {
    drive: Arc<dyn RemoteDrive>,
}

impl RemoteFetcher {
    pub fn new(drive: Arc<dyn RemoteDrive>) -> Self {
        Self { drive }
    }

    /// Fetch one item into `dest`: export for drive-native documents,
    /// direct download otherwise. Transient and local-I/O failures are
    /// retried up to [`MAX_DOWNLOAD_ATTEMPTS`] with a fixed delay; disk-full
    /// and permanent failures are not. Partial output is deleted after
    /// every failed attempt, so a fully-failed fetch leaves nothing behind
    /// for the archive to pick up. Cancellation propagates without being
    /// counted as a failure.
    pub async fn fetch(&self, ctx: &OpContext, item: &RemoteItem, dest: &Path) -> Result<u64> {
        let export = export_for(&item.mime_type);
        let mut last_error = VaultError::PermanentRemote("no attempt made".into());

        for attempt in 1..=MAX_DOWNLOAD_ATTEMPTS {
            ctx.check_cancelled()?;
            OpCounters::bump(&ctx.counters.download_attempts);

            let result = match export {
                Some(mapping) => {
                    self.drive
                        .export(&item.id, mapping.export_mime, dest)
                        .await
                }
                None => self.drive.download_native(&item.id, dest).await,
            };

            match result {
                Ok(bytes) => {
                    OpCounters::bump(&ctx.counters.successful_downloads);
                    OpCounters::add(&ctx.counters.bytes_downloaded, bytes);
                    debug!("Fetched {} ({} bytes) as {}", item.path, bytes, item.id);
                    return Ok(bytes);
                }
                Err(err) => {
                    let err: VaultError = err.into();
                    let retryable = err.is_retryable() && attempt < MAX_DOWNLOAD_ATTEMPTS;
                    warn!(
                        "Fetch attempt {}/{} failed for {}: {}{}",
                        attempt,
                        MAX_DOWNLOAD_ATTEMPTS,
                        item.path,
                        err,
                        if retryable { ", retrying" } else { "" }
                    );
                    last_error = err;
                    remove_partial(dest);
                    if !retryable {
                        break;
                    }
                    retry_backoff(ctx).await?;
                }
            }
        }

        OpCounters::bump(&ctx.counters.failed_downloads);
        Err(last_error)
    }
}

/// Drop an incomplete output file so the next attempt starts clean
fn remove_partial(dest: &Path) {
    if dest.exists() {
        if let Err(e) = std::fs::remove_file(dest) {
            warn!("Could not remove partial file {}: {}", dest.display(), e);
        }
    }
}
