//! Terminal-transition processing for worker replies, dispatch exceptions,
//! and reaper verdicts.
//!
//! All paths funnel through [`CompletionHandler`]: success persists
//! artifacts and debits usage in one transaction with the status CAS;
//! recoverable failures requeue while retries remain; everything else lands
//! in `FAILED`. A cancel that won the status race turns any of these into a
//! logged no-op.

use std::sync::Arc;

use chrono::Utc;
use tessera_core::lifecycle::{error_codes, is_retryable, JobStatus, MAX_RETRIES};
use tessera_db::models::artifact::ArtifactReport;
use tessera_db::models::job::Job;
use tessera_db::repositories::{ArtifactRepo, JobRepo, UsageRepo};
use tessera_db::DbPool;
use tessera_events::{EventBus, JobEvent};

use crate::worker_client::WorkerJobResult;

pub struct CompletionHandler {
    pool: DbPool,
    bus: Arc<EventBus>,
}

impl CompletionHandler {
    pub fn new(pool: DbPool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    /// Process one per-job worker reply.
    pub async fn handle_result(&self, job: &Job, result: WorkerJobResult) {
        if result.is_completed() {
            self.handle_success(
                job,
                result.execution_time_seconds.unwrap_or(0.0),
                &result.artifacts,
            )
            .await;
        } else {
            let (code, message) = match &result.error {
                Some(err) => (err.code.clone(), err.message.clone()),
                None => (
                    error_codes::WORKER_ERROR.to_string(),
                    "Worker reported failure without details".to_string(),
                ),
            };
            self.handle_failure(job, &code, &message).await;
        }
    }

    /// Success path: artifacts, `RUNNING -> COMPLETED`, usage debit, event.
    pub async fn handle_success(
        &self,
        job: &Job,
        execution_time_seconds: f64,
        artifacts: &[ArtifactReport],
    ) {
        match self
            .complete_in_tx(job, execution_time_seconds, artifacts)
            .await
        {
            Ok(Some((completed, artifact_values))) => {
                tracing::info!(
                    job_id = %job.id,
                    execution_time_seconds,
                    artifacts = artifacts.len(),
                    "Job completed",
                );
                self.publish(JobStatus::Completed, &completed, artifact_values);
            }
            Ok(None) => {
                // The CAS lost: a cancel beat this reply. No debit, no event
                // (the cancel path already announced the terminal state).
                tracing::info!(job_id = %job.id, "Late worker reply discarded");
            }
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "Completion write failed");
            }
        }
    }

    async fn complete_in_tx(
        &self,
        job: &Job,
        execution_time_seconds: f64,
        artifacts: &[ArtifactReport],
    ) -> Result<Option<(Job, Vec<serde_json::Value>)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut artifact_ids = Vec::with_capacity(artifacts.len());
        let mut artifact_values = Vec::with_capacity(artifacts.len());
        for report in artifacts {
            let artifact = ArtifactRepo::insert(&mut *tx, job.id, report).await?;
            artifact_ids.push(artifact.id);
            artifact_values.push(serde_json::to_value(&artifact).unwrap_or_default());
        }

        let Some(completed) =
            JobRepo::complete(&mut *tx, job.id, execution_time_seconds, &artifact_ids).await?
        else {
            // Roll back the artifact writes along with the lost CAS.
            tx.rollback().await?;
            return Ok(None);
        };

        if let Some(capability) = completed.capability() {
            UsageRepo::debit_completed(
                &mut *tx,
                completed.user_id,
                Utc::now().date_naive(),
                completed.cost_tokens,
                capability,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(Some((completed, artifact_values)))
    }

    /// Failure path: requeue while retries remain, otherwise `FAILED`.
    ///
    /// Scenario: a worker dies mid-run. The first death requeues the job
    /// with `retry_count = 1`; the second exhausts retries and the job fails
    /// with the original error code.
    pub async fn handle_failure(&self, job: &Job, code: &str, message: &str) {
        let attempts = job.retry_count() + 1;

        if is_retryable(code) && attempts < MAX_RETRIES {
            match JobRepo::requeue(&self.pool, job.id).await {
                Ok(Some(requeued)) => {
                    tracing::warn!(
                        job_id = %job.id,
                        code,
                        retry_count = requeued.retry_count(),
                        "Job requeued after recoverable failure",
                    );
                    return;
                }
                Ok(None) => {
                    tracing::info!(job_id = %job.id, "Requeue skipped, job no longer running");
                    return;
                }
                Err(err) => {
                    tracing::error!(job_id = %job.id, error = %err, "Requeue write failed");
                    return;
                }
            }
        }

        let error = serde_json::json!({
            "code": code,
            "message": message,
            "timestamp": Utc::now(),
            "retry_count": attempts,
        });

        match JobRepo::fail(&self.pool, job.id, &error).await {
            Ok(Some(failed)) => {
                tracing::warn!(job_id = %job.id, code, message, "Job failed");
                let _ = UsageRepo::record_failure(
                    &self.pool,
                    failed.user_id,
                    Utc::now().date_naive(),
                )
                .await;
                self.publish(JobStatus::Failed, &failed, Vec::new());
            }
            Ok(None) => {
                tracing::info!(job_id = %job.id, "Failure write skipped, job no longer running");
            }
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "Failure write failed");
            }
        }
    }

    /// Announce a terminal transition on the bus (webhooks subscribe).
    pub fn publish(&self, status: JobStatus, job: &Job, artifacts: Vec<serde_json::Value>) {
        let data = serde_json::json!({
            "job": job,
            "artifacts": artifacts,
        });
        let event = JobEvent::new(status, job.id, data)
            .with_webhook_url(job.webhook_url().map(str::to_string));
        self.bus.publish(event);
    }
}
