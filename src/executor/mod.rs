//! Bounded parallel task runner with cancellation propagation.
//!
//! The engines hand the runner a batch of independent unit-of-work futures;
//! it executes up to `limit` of them concurrently, observes the shared
//! cancellation token before scheduling and before each job body, and joins
//! every spawned task before returning so no orphans survive an operation.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Clamp a configured worker count into the supported [1, 10] range
pub fn clamp_parallelism(configured: i64) -> usize {
    configured.clamp(1, 10) as usize
}

/// Semaphore-bounded runner shared by the backup, restore and repair phases
pub struct ParallelRunner {
    limit: usize,
    cancel: CancellationToken,
}

impl ParallelRunner {
    pub fn new(limit: i64, cancel: CancellationToken) -> Self {
        Self {
            limit: clamp_parallelism(limit),
            cancel,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run all jobs with bounded concurrency and join them to completion.
    ///
    /// On cancellation no further job bodies start; in-flight jobs are
    /// allowed to finish or self-abort via the token they captured.
    pub async fn run<Fut>(&self, jobs: Vec<Fut>)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            // Stop scheduling new work once cancelled
            if self.cancel.is_cancelled() {
                break;
            }

            let sem = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    permit = sem.acquire() => match permit {
                        Ok(p) => p,
                        Err(_) => return,
                    },
                    _ = cancel.cancelled() => return,
                };

                // A cancel may have landed while we waited for the permit
                if cancel.is_cancelled() {
                    return;
                }

                job.await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Worker task panicked: {}", e);
                }
            }
        }
    }
}
