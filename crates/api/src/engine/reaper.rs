//! The reaper: a periodic sweep for dead workers and stuck jobs.
//!
//! Every interval it (i) reclassifies the worker registry and requeues or
//! fails jobs orphaned by newly-dead workers, and (ii) fails `RUNNING` jobs
//! whose execution deadline plus grace has passed. Both paths reuse the
//! completion handler's retry rules, so a reaped job gets the same bounded
//! requeue behavior as a worker-reported failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use tessera_core::lifecycle::error_codes;
use tessera_core::scheduling::REAPER_GRACE_SECS;
use tessera_db::repositories::JobRepo;
use tessera_db::DbPool;

use crate::engine::completion::CompletionHandler;
use crate::registry::WorkerRegistry;

pub struct Reaper {
    pool: DbPool,
    registry: Arc<WorkerRegistry>,
    completion: Arc<CompletionHandler>,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        pool: DbPool,
        registry: Arc<WorkerRegistry>,
        completion: Arc<CompletionHandler>,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            completion,
            interval,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Reaper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One sweep. Errors are logged, never fatal to the loop.
    async fn sweep(&self) {
        self.reap_dead_workers().await;
        self.reap_stuck_jobs().await;
    }

    /// Requeue (or fail, once retries are exhausted) jobs attributed to
    /// workers whose heartbeat went silent past the dead threshold.
    async fn reap_dead_workers(&self) {
        let report = self.registry.sweep_at(Instant::now()).await;

        for worker_id in &report.purged {
            tracing::info!(worker_id, "Dead worker entry purged after retention");
        }

        for worker_id in report.newly_dead {
            tracing::warn!(worker_id, "Worker declared dead, reclaiming its jobs");

            let orphaned = match tessera_db::with_retry("running_on_worker", || {
                JobRepo::running_on_worker(&self.pool, &worker_id)
            })
            .await
            {
                Ok(jobs) => jobs,
                Err(err) => {
                    tracing::error!(worker_id, error = %err, "Orphan lookup failed");
                    continue;
                }
            };

            for job in orphaned {
                self.completion
                    .handle_failure(
                        &job,
                        error_codes::WORKER_ERROR,
                        "Worker stopped heartbeating while the job was running",
                    )
                    .await;
            }
        }
    }

    /// Fail jobs that outlived `started_at + timeout_seconds + grace`.
    async fn reap_stuck_jobs(&self) {
        let stuck = match tessera_db::with_retry("stuck_running", || {
            JobRepo::stuck_running(&self.pool, REAPER_GRACE_SECS as i32)
        })
        .await
        {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::error!(error = %err, "Stuck-job lookup failed");
                return;
            }
        };

        for job in stuck {
            tracing::warn!(
                job_id = %job.id,
                worker_id = job.worker_id.as_deref().unwrap_or("unknown"),
                "Job exceeded its execution deadline",
            );
            self.completion
                .handle_failure(
                    &job,
                    error_codes::WORKER_TIMEOUT,
                    "Execution deadline exceeded",
                )
                .await;
        }
    }
}
