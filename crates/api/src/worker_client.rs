//! HTTP client for control-plane → worker calls.
//!
//! Three call sites: `POST {worker}/run_job` from the dispatcher (with a
//! deadline of the job timeout plus grace), `POST {worker}/abort_job` for
//! best-effort cancellation, and `GET {worker}/health` /
//! `GET {worker}/capabilities` for operator probes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_db::models::artifact::ArtifactReport;
use tessera_db::models::job::Job;
use tessera_core::lifecycle::error_codes;
use tessera_core::types::JobId;

/// Timeout for non-dispatch calls (health, capabilities, abort).
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One job as shipped to a worker.
#[derive(Debug, Clone, Serialize)]
pub struct JobPayload {
    pub job_id: JobId,
    pub engine: &'static str,
    pub workflow_id: Option<String>,
    pub model_id: Option<String>,
    pub params: serde_json::Value,
    pub timeout_seconds: i32,
}

impl JobPayload {
    pub fn from_job(job: &Job) -> Self {
        let engine = job
            .capability()
            .map(tessera_core::params::engine_for)
            .unwrap_or("comfyui");
        Self {
            job_id: job.id,
            engine,
            workflow_id: job.workflow_id.clone(),
            model_id: job.model().map(str::to_string),
            params: job.params.clone(),
            timeout_seconds: job.timeout_seconds,
        }
    }
}

/// Body of `POST {worker}/run_job`. A single job is sent flat; batch
/// members beyond the first ride in `batch`.
#[derive(Debug, Serialize)]
pub struct RunJobRequest {
    #[serde(flatten)]
    pub job: JobPayload,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batch: Vec<JobPayload>,
}

/// A worker-side error report.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerErrorBody {
    #[serde(default = "default_error_code")]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

fn default_error_code() -> String {
    error_codes::WORKER_ERROR.to_string()
}

/// Per-job outcome in a worker's reply.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerJobResult {
    pub status: String,
    pub job_id: JobId,
    #[serde(default)]
    pub execution_time_seconds: Option<f64>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactReport>,
    #[serde(default)]
    pub error: Option<WorkerErrorBody>,
}

impl WorkerJobResult {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// A worker replies flat for a single job, or `{ "results": [...] }` for a
/// batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RunJobResponse {
    Batch { results: Vec<WorkerJobResult> },
    Single(WorkerJobResult),
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkerCallError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Worker returned HTTP {0}")]
    HttpStatus(u16),
}

impl WorkerCallError {
    /// The job error code this failure maps to: deadline overruns are
    /// `WORKER_TIMEOUT`, everything else `WORKER_ERROR`.
    pub fn job_error_code(&self) -> &'static str {
        match self {
            WorkerCallError::Request(e) if e.is_timeout() => error_codes::WORKER_TIMEOUT,
            _ => error_codes::WORKER_ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerClient
// ---------------------------------------------------------------------------

/// Shared HTTP client for all worker RPCs.
pub struct WorkerClient {
    client: reqwest::Client,
}

impl WorkerClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client }
    }

    /// Dispatch a job (or batch) and wait for the worker's reply.
    ///
    /// The per-request timeout must already include the dispatch grace; no
    /// storage transaction may be held across this call.
    pub async fn run_job(
        &self,
        base_url: &str,
        request: &RunJobRequest,
        timeout: Duration,
    ) -> Result<Vec<WorkerJobResult>, WorkerCallError> {
        let response = self
            .client
            .post(format!("{base_url}/run_job"))
            .timeout(timeout)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WorkerCallError::HttpStatus(response.status().as_u16()));
        }

        let parsed: RunJobResponse = response.json().await?;
        Ok(match parsed {
            RunJobResponse::Batch { results } => results,
            RunJobResponse::Single(result) => vec![result],
        })
    }

    /// Best-effort abort of a running job. The authoritative cancel has
    /// already been applied to the job record; failures here are logged and
    /// ignored.
    pub async fn abort_job(&self, base_url: &str, job_id: JobId) -> Result<(), WorkerCallError> {
        let response = self
            .client
            .post(format!("{base_url}/abort_job"))
            .timeout(PROBE_TIMEOUT)
            .json(&serde_json::json!({ "job_id": job_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WorkerCallError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }

    /// Operator-initiated health probe.
    pub async fn health(&self, base_url: &str) -> Result<(), WorkerCallError> {
        let response = self
            .client
            .get(format!("{base_url}/health"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WorkerCallError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }

    /// Ad-hoc capability query, used during initial registration checks.
    pub async fn capabilities(
        &self,
        base_url: &str,
    ) -> Result<serde_json::Value, WorkerCallError> {
        let response = self
            .client
            .get(format!("{base_url}/capabilities"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WorkerCallError::HttpStatus(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

impl Default for WorkerClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_reply_parses_flat() {
        let raw = serde_json::json!({
            "status": "completed",
            "job_id": JobId::new_v4(),
            "execution_time_seconds": 5.0,
            "artifacts": [{"type": "image", "path": "/o/1.png"}],
        });
        let parsed: RunJobResponse = serde_json::from_value(raw).unwrap();
        let RunJobResponse::Single(result) = parsed else {
            panic!("expected single result");
        };
        assert!(result.is_completed());
        assert_eq!(result.artifacts.len(), 1);
    }

    #[test]
    fn batch_reply_parses_results_array() {
        let raw = serde_json::json!({
            "results": [
                {"status": "completed", "job_id": JobId::new_v4(), "artifacts": []},
                {"status": "failed", "job_id": JobId::new_v4(),
                 "error": {"code": "OOM", "message": "cuda out of memory"}},
            ],
        });
        let parsed: RunJobResponse = serde_json::from_value(raw).unwrap();
        let RunJobResponse::Batch { results } = parsed else {
            panic!("expected batch results");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].error.as_ref().unwrap().code, "OOM");
    }

    #[test]
    fn failed_reply_without_error_body_defaults_to_worker_error() {
        let raw = serde_json::json!({
            "status": "failed",
            "job_id": JobId::new_v4(),
            "error": {"message": "boom"},
        });
        let parsed: WorkerJobResult = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.error.unwrap().code, error_codes::WORKER_ERROR);
    }

    #[test]
    fn single_job_request_serializes_flat() {
        let payload = JobPayload {
            job_id: JobId::new_v4(),
            engine: "comfyui",
            workflow_id: None,
            model_id: Some("sdxl".into()),
            params: serde_json::json!({"prompt": "a sunset"}),
            timeout_seconds: 300,
        };
        let request = RunJobRequest {
            job: payload,
            batch: Vec::new(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["engine"], "comfyui");
        assert!(json.get("batch").is_none());
    }
}
