//! Job entity and DTOs. The job is the only entity whose state evolves
//! through a machine; `status` holds one of the uppercase lifecycle codes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tessera_core::lifecycle::JobStatus;
use tessera_core::types::{Capability, DbId, JobId, Timestamp};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: DbId,
    pub frontend: String,
    pub bot_id: Option<String>,
    pub capability: String,
    pub status: String,
    /// Snapshot of the user's plan priority at admission time. Plan changes
    /// never reprioritize in-flight work.
    pub priority: i32,
    pub params: serde_json::Value,
    pub workflow_id: Option<String>,
    pub cost_tokens: Decimal,
    pub timeout_seconds: i32,
    pub worker_id: Option<String>,
    pub created_at: Timestamp,
    pub queued_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
    pub execution_time_seconds: Option<f64>,
    pub error: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn capability(&self) -> Option<Capability> {
        self.capability.parse().ok()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(JobStatus::is_terminal)
    }

    /// How many times this job has been requeued after a recoverable failure.
    pub fn retry_count(&self) -> u32 {
        self.metadata
            .get("retry_count")
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Completion callback URL supplied at creation, if any.
    pub fn webhook_url(&self) -> Option<&str> {
        self.metadata.get("webhook_url").and_then(|v| v.as_str())
    }

    /// Opaque frontend routing context supplied at creation, if any.
    pub fn reply_context(&self) -> Option<&serde_json::Value> {
        self.metadata.get("reply_context")
    }

    /// The model this job requests, when its params carry one.
    pub fn model(&self) -> Option<&str> {
        self.params.get("model").and_then(|v| v.as_str())
    }
}

/// Fields for inserting a new job during admission.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub user_id: DbId,
    pub frontend: String,
    pub bot_id: Option<String>,
    pub capability: Capability,
    pub priority: i32,
    pub params: serde_json::Value,
    pub workflow_id: Option<String>,
    pub cost_tokens: Decimal,
    pub timeout_seconds: i32,
    pub metadata: serde_json::Value,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by lifecycle status code (e.g. `QUEUED`).
    pub status: Option<String>,
    /// Filter by capability (e.g. `image`).
    pub capability: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
    /// Only jobs created at or after this instant.
    pub since: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn job(metadata: serde_json::Value) -> Job {
        Job {
            id: Uuid::new_v4(),
            user_id: 1,
            frontend: "telegram".into(),
            bot_id: None,
            capability: "image".into(),
            status: "QUEUED".into(),
            priority: 0,
            params: serde_json::json!({"model": "sdxl"}),
            workflow_id: None,
            cost_tokens: Decimal::ONE,
            timeout_seconds: 300,
            worker_id: None,
            created_at: Utc::now(),
            queued_at: Some(Utc::now()),
            started_at: None,
            ended_at: None,
            execution_time_seconds: None,
            error: None,
            metadata,
        }
    }

    #[test]
    fn retry_count_defaults_to_zero() {
        assert_eq!(job(serde_json::json!({})).retry_count(), 0);
    }

    #[test]
    fn retry_count_reads_metadata() {
        assert_eq!(job(serde_json::json!({"retry_count": 2})).retry_count(), 2);
    }

    #[test]
    fn status_and_capability_parse() {
        let j = job(serde_json::json!({}));
        assert_eq!(j.status(), Some(JobStatus::Queued));
        assert_eq!(j.capability(), Some(Capability::Image));
        assert!(!j.is_terminal());
    }

    #[test]
    fn model_is_read_from_params() {
        assert_eq!(job(serde_json::json!({})).model(), Some("sdxl"));
    }
}
