//! The dispatcher: a single long-lived loop pairing idle workers with
//! queued jobs.
//!
//! Each tick takes an in-memory snapshot of dispatchable workers and one
//! indexed read of the queued backlog, then runs the pure selection rules
//! from `tessera_core::scheduling` (priority, model affinity with a bounded
//! starvation exception, batch assembly). Claims are compare-and-swap
//! `QUEUED -> RUNNING` updates; members stolen by a concurrent cancel are
//! dropped and the rest of the batch proceeds. The dispatch RPC runs in a
//! spawned task with no storage transaction held across it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use tessera_core::scheduling::{
    self, assemble_batch, batch_key_from_params, select_job, QueuedJobView,
};
use tessera_core::types::JobId;
use tessera_db::models::job::Job;
use tessera_db::repositories::JobRepo;
use tessera_db::DbPool;

use crate::engine::completion::CompletionHandler;
use crate::registry::{DispatchTarget, WorkerRegistry};
use crate::worker_client::{JobPayload, RunJobRequest, WorkerClient};

/// How many queued jobs one tick considers.
const BACKLOG_LIMIT: i64 = 200;

pub struct Dispatcher {
    pool: DbPool,
    registry: Arc<WorkerRegistry>,
    client: Arc<WorkerClient>,
    completion: Arc<CompletionHandler>,
    tick_interval: Duration,
    /// Affinity starvation counters for queued jobs, by job id. Reset when a
    /// job leaves the queue; advisory, so loss on restart is harmless.
    passed_over: Mutex<HashMap<JobId, u32>>,
}

impl Dispatcher {
    pub fn new(
        pool: DbPool,
        registry: Arc<WorkerRegistry>,
        client: Arc<WorkerClient>,
        completion: Arc<CompletionHandler>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            client,
            completion,
            tick_interval,
            passed_over: Mutex::new(HashMap::new()),
        }
    }

    /// Run the dispatch loop until the cancellation token is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        tracing::info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "Dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }
    }

    /// One dispatch cycle.
    async fn tick(&self) -> Result<(), sqlx::Error> {
        let targets = self.registry.dispatch_targets().await;
        if targets.is_empty() {
            return Ok(());
        }

        let backlog = tessera_db::with_retry("queued_backlog", || {
            JobRepo::queued_backlog(&self.pool, BACKLOG_LIMIT)
        })
        .await?;
        if backlog.is_empty() {
            return Ok(());
        }

        let mut views = self.build_views(&backlog).await;

        for target in targets {
            if views.is_empty() {
                break;
            }

            let Some(selection) = select_job(&target.snapshot, &views) else {
                continue;
            };
            self.bump_starvation(&selection.displaced).await;

            let batch_ids = assemble_batch(&views, selection.job);

            // Claim every member; drop the ones stolen by a concurrent
            // cancel and proceed with the rest.
            let mut claimed: Vec<Job> = Vec::with_capacity(batch_ids.len());
            for job_id in &batch_ids {
                match JobRepo::claim_for_dispatch(&self.pool, *job_id, &target.snapshot.worker_id)
                    .await?
                {
                    Some(job) => claimed.push(job),
                    None => {
                        tracing::debug!(job_id = %job_id, "Claim lost, dropping batch member");
                    }
                }
            }

            // Whatever happened, these ids are no longer queued this tick.
            views.retain(|v| !batch_ids.contains(&v.id));
            self.clear_starvation(&batch_ids).await;

            if claimed.is_empty() {
                continue;
            }

            tracing::info!(
                worker_id = %target.snapshot.worker_id,
                jobs = claimed.len(),
                job_id = %claimed[0].id,
                "Dispatching to worker",
            );

            let claimed_ids: Vec<JobId> = claimed.iter().map(|j| j.id).collect();
            self.registry
                .mark_busy(&target.snapshot.worker_id, &claimed_ids)
                .await;

            let registry = Arc::clone(&self.registry);
            let client = Arc::clone(&self.client);
            let completion = Arc::clone(&self.completion);
            tokio::spawn(async move {
                dispatch_batch(registry, client, completion, target, claimed).await;
            });
        }

        Ok(())
    }

    /// Project queued jobs into selection views, attaching starvation
    /// counters and batch keys. Jobs with unparseable capability are skipped
    /// (they cannot be matched to any worker).
    async fn build_views(&self, backlog: &[Job]) -> Vec<QueuedJobView> {
        let counters = self.passed_over.lock().await;
        backlog
            .iter()
            .filter_map(|job| {
                let capability = job.capability()?;
                Some(QueuedJobView {
                    id: job.id,
                    priority: job.priority,
                    queued_at: job.queued_at.unwrap_or(job.created_at),
                    capability,
                    model: job.model().map(str::to_string),
                    batch_key: batch_key_from_params(capability, &job.params),
                    passed_over: counters.get(&job.id).copied().unwrap_or(0),
                })
            })
            .collect()
    }

    async fn bump_starvation(&self, displaced: &[JobId]) {
        if displaced.is_empty() {
            return;
        }
        let mut counters = self.passed_over.lock().await;
        for id in displaced {
            let count = counters.entry(*id).or_insert(0);
            *count += 1;
            if *count == scheduling::AFFINITY_STARVATION_LIMIT {
                tracing::debug!(job_id = %id, "Affinity suspended for starved job");
            }
        }
    }

    async fn clear_starvation(&self, ids: &[JobId]) {
        let mut counters = self.passed_over.lock().await;
        for id in ids {
            counters.remove(id);
        }
    }
}

/// Ship a claimed batch to its worker and route the outcome to the
/// completion handler. Runs in its own task; errors never reach the loop.
async fn dispatch_batch(
    registry: Arc<WorkerRegistry>,
    client: Arc<WorkerClient>,
    completion: Arc<CompletionHandler>,
    target: DispatchTarget,
    claimed: Vec<Job>,
) {
    let worker_id = target.snapshot.worker_id.clone();
    let claimed_ids: Vec<JobId> = claimed.iter().map(|j| j.id).collect();

    // RPC deadline: the slowest member's own deadline plus grace.
    let max_timeout = claimed
        .iter()
        .map(|j| j.timeout_seconds.max(0) as u64)
        .max()
        .unwrap_or(300);
    let rpc_timeout =
        Duration::from_secs(max_timeout + u64::from(scheduling::DISPATCH_RPC_GRACE_SECS));

    let mut payloads = claimed.iter().map(JobPayload::from_job);
    let request = RunJobRequest {
        job: payloads.next().expect("claimed batch is non-empty"),
        batch: payloads.collect(),
    };

    match client.run_job(&target.base_url, &request, rpc_timeout).await {
        Ok(results) => {
            let mut by_job: HashMap<JobId, _> =
                results.into_iter().map(|r| (r.job_id, r)).collect();
            let mut any_failed = false;

            for job in &claimed {
                match by_job.remove(&job.id) {
                    Some(result) => {
                        any_failed |= !result.is_completed();
                        completion.handle_result(job, result).await;
                    }
                    None => {
                        any_failed = true;
                        completion
                            .handle_failure(
                                job,
                                tessera_core::lifecycle::error_codes::WORKER_ERROR,
                                "Worker reply omitted this job",
                            )
                            .await;
                    }
                }
            }

            if any_failed {
                record_worker_failure(&registry, &worker_id).await;
            }
        }
        Err(err) => {
            let code = err.job_error_code();
            tracing::warn!(
                worker_id = %worker_id,
                error = %err,
                code,
                "Dispatch call failed",
            );
            for job in &claimed {
                completion.handle_failure(job, code, &err.to_string()).await;
            }
            record_worker_failure(&registry, &worker_id).await;
        }
    }

    registry.mark_idle(&worker_id, &claimed_ids).await;
}

async fn record_worker_failure(registry: &WorkerRegistry, worker_id: &str) {
    if registry.record_failure(worker_id).await {
        tracing::warn!(worker_id, "Worker quarantined pending operator probe");
    }
}
