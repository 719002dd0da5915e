//! Shared engine plumbing: operation context, counters, outcome types.
//!
//! Every operation (backup, restore, repair) runs against one [`OpContext`]
//! carrying the cancellation token, the worker bound and the atomic counter
//! set. Phases receive the context instead of reaching for globals.

pub mod backup;
pub mod repair;
pub mod restore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::executor::ParallelRunner;
use crate::utils::errors::{Result, VaultError};

/// UTC stamp used in temp-directory and archive names
pub fn utc_stamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Two modification times are equivalent iff their UTC representations
/// differ by strictly less than one second. A missing time on either side
/// means non-equivalence.
pub fn times_equivalent(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let diff = (a - b).num_milliseconds().abs();
            diff < 1000
        }
        _ => false,
    }
}

/// Thread-safe counter set updated by workers across all phases
#[derive(Debug, Default)]
pub struct OpCounters {
    pub files_listed: AtomicU64,
    pub unsupported_skipped: AtomicU64,
    pub files_copied: AtomicU64,
    pub copy_errors: AtomicU64,
    pub download_attempts: AtomicU64,
    pub successful_downloads: AtomicU64,
    pub failed_downloads: AtomicU64,
    pub bytes_copied: AtomicU64,
    pub bytes_downloaded: AtomicU64,
    pub folders_created: AtomicU64,
    pub files_uploaded: AtomicU64,
    pub files_already_done: AtomicU64,
    pub files_skipped: AtomicU64,
    pub upload_attempts: AtomicU64,
    pub failed_uploads: AtomicU64,
    pub bytes_uploaded: AtomicU64,
    pub files_found_ok: AtomicU64,
    pub files_missing: AtomicU64,
    pub repairs_skipped_no_id: AtomicU64,
}

impl OpCounters {
    pub fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            files_listed: self.files_listed.load(Ordering::Relaxed),
            unsupported_skipped: self.unsupported_skipped.load(Ordering::Relaxed),
            files_copied: self.files_copied.load(Ordering::Relaxed),
            copy_errors: self.copy_errors.load(Ordering::Relaxed),
            download_attempts: self.download_attempts.load(Ordering::Relaxed),
            successful_downloads: self.successful_downloads.load(Ordering::Relaxed),
            failed_downloads: self.failed_downloads.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            folders_created: self.folders_created.load(Ordering::Relaxed),
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            files_already_done: self.files_already_done.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            upload_attempts: self.upload_attempts.load(Ordering::Relaxed),
            failed_uploads: self.failed_uploads.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            files_found_ok: self.files_found_ok.load(Ordering::Relaxed),
            files_missing: self.files_missing.load(Ordering::Relaxed),
            repairs_skipped_no_id: self.repairs_skipped_no_id.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters, embedded in operation outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub files_listed: u64,
    pub unsupported_skipped: u64,
    pub files_copied: u64,
    pub copy_errors: u64,
    pub download_attempts: u64,
    pub successful_downloads: u64,
    pub failed_downloads: u64,
    pub bytes_copied: u64,
    pub bytes_downloaded: u64,
    pub folders_created: u64,
    pub files_uploaded: u64,
    pub files_already_done: u64,
    pub files_skipped: u64,
    pub upload_attempts: u64,
    pub failed_uploads: u64,
    pub bytes_uploaded: u64,
    pub files_found_ok: u64,
    pub files_missing: u64,
    pub repairs_skipped_no_id: u64,
}

/// Per-operation context threaded through every phase
pub struct OpContext {
    pub cancel: CancellationToken,
    pub counters: OpCounters,
    parallel_tasks: i64,
}

impl OpContext {
    pub fn new(parallel_tasks: i64, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            counters: OpCounters::default(),
            parallel_tasks,
        }
    }

    pub fn runner(&self) -> ParallelRunner {
        ParallelRunner::new(self.parallel_tasks, self.cancel.clone())
    }

    pub fn parallel_tasks(&self) -> i64 {
        self.parallel_tasks
    }

    /// Cancellation as a predicate; called at every suspension point
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(VaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a backup operation
#[derive(Debug)]
pub struct BackupOutcome {
    /// Clean run: no failed downloads and no copy errors
    pub success: bool,
    pub cancelled: bool,
    pub duration: Duration,
    pub counters: CounterSnapshot,
    /// Emitted archive; present even on dirty runs, absent when cancelled
    pub archive_path: Option<PathBuf>,
}

/// Result of a restore operation
#[derive(Debug)]
pub struct RestoreOutcome {
    pub success: bool,
    pub cancelled: bool,
    pub duration: Duration,
    pub counters: CounterSnapshot,
    /// Preserved extraction directory to resume from; `None` after success
    pub resume_dir: Option<PathBuf>,
}

/// Result of a repair operation
#[derive(Debug)]
pub struct RepairOutcome {
    pub repair_attempted: bool,
    pub overall_success: bool,
    pub cancelled: bool,
    pub duration: Duration,
    pub counters: CounterSnapshot,
    pub repaired_archive: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_millis(ms: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[test]
    fn sub_second_times_are_equivalent() {
        assert!(times_equivalent(at_millis(10_000), at_millis(10_000)));
        assert!(times_equivalent(at_millis(10_000), at_millis(10_999)));
        assert!(times_equivalent(at_millis(10_999), at_millis(10_000)));
    }

    #[test]
    fn full_second_difference_is_not_equivalent() {
        assert!(!times_equivalent(at_millis(10_000), at_millis(11_000)));
        assert!(!times_equivalent(at_millis(10_000), at_millis(11_001)));
    }

    #[test]
    fn missing_times_are_never_equivalent() {
        assert!(!times_equivalent(None, at_millis(10_000)));
        assert!(!times_equivalent(at_millis(10_000), None));
        assert!(!times_equivalent(None, None));
    }

    #[test]
    fn counter_snapshot_reflects_updates() {
        let counters = OpCounters::default();
        OpCounters::bump(&counters.files_listed);
        OpCounters::bump(&counters.files_listed);
        OpCounters::add(&counters.bytes_downloaded, 512);

        let snap = counters.snapshot();
        assert_eq!(snap.files_listed, 2);
        assert_eq!(snap.bytes_downloaded, 512);
        assert_eq!(snap.failed_downloads, 0);
    }

    #[test]
    fn cancellation_predicate() {
        let ctx = OpContext::new(1, CancellationToken::new());
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel.cancel();
        assert!(matches!(ctx.check_cancelled(), Err(VaultError::Cancelled)));
    }

    mod round_trip {
        use super::super::backup::{BackupEngine, BackupRequest, ExclusionSet};
        use super::super::restore::{RestoreEngine, RestoreOptions, RestoreRequest};
        use super::super::OpContext;
        use crate::remote::fake::FakeDrive;
        use crate::remote::RemoteDrive;
        use chrono::Utc;
        use std::sync::Arc;
        use tempfile::TempDir;
        use tokio_util::sync::CancellationToken;

        /// Backup of a static subtree followed by a restore reproduces every
        /// path, name and content the manifest recorded.
        #[tokio::test]
        async fn backup_then_restore_reproduces_the_subtree() {
            let drive = Arc::new(FakeDrive::new("backup-root"));
            drive.add_folder("backup-root", "d1", "docs");
            drive.add_file("backup-root", "X1", "a.txt", "text/plain", b"hello", Some(Utc::now()));
            drive.add_file("d1", "X2", "plan.pdf", "application/pdf", b"%PDF", Some(Utc::now()));

            let work = TempDir::new().unwrap();
            let backup = BackupEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);
            let ctx = Arc::new(OpContext::new(2, CancellationToken::new()));
            let outcome = backup
                .execute(
                    ctx,
                    BackupRequest {
                        root_id: "backup-root".to_string(),
                        prior_archive: None,
                        exclusions: ExclusionSet::default(),
                        temp_dir: work.path().join("tmp"),
                        output_dir: work.path().join("archives"),
                    },
                )
                .await
                .unwrap();
            assert!(outcome.success);
            let archive = outcome.archive_path.unwrap();

            let restore = RestoreEngine::new(Arc::clone(&drive) as Arc<dyn RemoteDrive>);
            let restored = restore
                .execute(
                    CancellationToken::new(),
                    &RestoreOptions {
                        restore_parent_id: "restore-parent".to_string(),
                        max_parallel_tasks: 2,
                        temp_dir: work.path().join("tmp"),
                    },
                    RestoreRequest::Fresh { archive },
                )
                .await
                .unwrap();
            assert!(restored.success);
            assert_eq!(restored.counters.files_uploaded, 2);

            // The original tree reappears under the restore parent
            let roots = drive.child_folders("restore-parent");
            assert_eq!(roots.len(), 1);
            assert_eq!(roots[0].1, "Root");
            let under_root = drive.child_folders(&roots[0].0);
            assert_eq!(under_root.len(), 1);
            assert_eq!(under_root[0].1, "docs");

            let mut uploads = drive.uploads();
            uploads.sort_by(|a, b| a.name.cmp(&b.name));
            assert_eq!(uploads[0].name, "a.txt");
            assert_eq!(uploads[0].content, b"hello");
            assert_eq!(uploads[1].name, "plan.pdf");
            assert_eq!(uploads[1].mime, "application/pdf");
            assert_eq!(uploads[1].content, b"%PDF");
        }
    }
}
