//! Repository for the `jobs` table.
//!
//! Every status change is a compare-and-swap: the `UPDATE` names the expected
//! prior status in its `WHERE` clause and the caller inspects whether a row
//! came back. Cancel racing dispatch, completion racing cancel, and a second
//! dispatcher instance all resolve through the same mechanism — whichever
//! write observes the expected state wins, the loser is a no-op.

use sqlx::{PgConnection, PgPool};
use tessera_core::lifecycle::JobStatus;
use tessera_core::types::{DbId, JobId, Timestamp};

use crate::models::job::{Job, JobListQuery, NewJob};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, frontend, bot_id, capability, status, priority, params, \
    workflow_id, cost_tokens, timeout_seconds, worker_id, \
    created_at, queued_at, started_at, ended_at, \
    execution_time_seconds, error, metadata";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

pub struct JobRepo;

impl JobRepo {
    // ── Admission ────────────────────────────────────────────────────────

    /// Insert a job in `CREATED` state inside the admission transaction.
    pub async fn insert_created(
        conn: &mut PgConnection,
        input: &NewJob,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (id, user_id, frontend, bot_id, capability, status, priority, \
                  params, workflow_id, cost_tokens, timeout_seconds, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.id)
            .bind(input.user_id)
            .bind(&input.frontend)
            .bind(&input.bot_id)
            .bind(input.capability.as_str())
            .bind(JobStatus::Created.as_str())
            .bind(input.priority)
            .bind(&input.params)
            .bind(&input.workflow_id)
            .bind(input.cost_tokens)
            .bind(input.timeout_seconds)
            .bind(&input.metadata)
            .fetch_one(conn)
            .await
    }

    /// Transition `CREATED -> QUEUED`, stamping `queued_at`. Completes the
    /// admission commit.
    pub async fn mark_queued(conn: &mut PgConnection, id: JobId) -> Result<Job, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET status = $2, queued_at = NOW() \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Queued.as_str())
            .bind(JobStatus::Created.as_str())
            .fetch_one(conn)
            .await
    }

    /// Number of queued jobs ahead of a job with this priority/queue stamp:
    /// strictly higher priority, or equal priority queued earlier.
    pub async fn queue_position(
        conn: &mut PgConnection,
        priority: i32,
        queued_at: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs \
             WHERE status = $1 \
               AND (priority > $2 OR (priority = $2 AND queued_at < $3))",
        )
        .bind(JobStatus::Queued.as_str())
        .bind(priority)
        .bind(queued_at)
        .fetch_one(conn)
        .await
    }

    /// Count a user's non-terminal jobs (the concurrency check).
    pub async fn count_active_for_user(
        conn: &mut PgConnection,
        user_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs \
             WHERE user_id = $1 AND status IN ($2, $3, $4)",
        )
        .bind(user_id)
        .bind(JobStatus::Created.as_str())
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_one(conn)
        .await
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// The queued backlog in dispatch order: priority desc, queued_at asc,
    /// id asc. Served by the partial active-queue index.
    pub async fn queued_backlog(pool: &PgPool, limit: i64) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = $1 \
             ORDER BY priority DESC, queued_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Queued.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// CAS `QUEUED -> RUNNING`, assigning the worker and stamping
    /// `started_at`. Returns `None` if the job was stolen (cancelled or
    /// claimed) in the meantime.
    pub async fn claim_for_dispatch(
        pool: &PgPool,
        id: JobId,
        worker_id: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET status = $2, worker_id = $3, started_at = NOW() \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Running.as_str())
            .bind(worker_id)
            .bind(JobStatus::Queued.as_str())
            .fetch_optional(pool)
            .await
    }

    // ── Completion ───────────────────────────────────────────────────────

    /// CAS `RUNNING -> COMPLETED` inside the completion transaction, storing
    /// execution time and the produced artifact ids. Returns `None` if the
    /// job is no longer running (e.g. a cancel won the race) — the caller
    /// must then skip the usage debit.
    pub async fn complete(
        conn: &mut PgConnection,
        id: JobId,
        execution_time_seconds: f64,
        artifact_ids: &[JobId],
    ) -> Result<Option<Job>, sqlx::Error> {
        let ids_json = serde_json::to_value(artifact_ids)
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        let query = format!(
            "UPDATE jobs SET \
                status = $2, ended_at = NOW(), execution_time_seconds = $3, \
                metadata = jsonb_set(metadata, '{{artifact_ids}}', $4::jsonb) \
             WHERE id = $1 AND status = $5 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Completed.as_str())
            .bind(execution_time_seconds)
            .bind(ids_json)
            .bind(JobStatus::Running.as_str())
            .fetch_optional(conn)
            .await
    }

    /// CAS `RUNNING -> FAILED` with a structured error record.
    pub async fn fail(
        pool: &PgPool,
        id: JobId,
        error: &serde_json::Value,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET status = $2, ended_at = NOW(), error = $3 \
             WHERE id = $1 AND status = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Failed.as_str())
            .bind(error)
            .bind(JobStatus::Running.as_str())
            .fetch_optional(pool)
            .await
    }

    /// CAS `RUNNING -> QUEUED` after a recoverable failure: clears the worker
    /// assignment, re-stamps `queued_at`, and increments the retry counter.
    pub async fn requeue(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET \
                status = $2, worker_id = NULL, started_at = NULL, queued_at = NOW(), \
                metadata = jsonb_set( \
                    metadata, '{{retry_count}}', \
                    to_jsonb(COALESCE((metadata->>'retry_count')::int, 0) + 1)) \
             WHERE id = $1 AND status = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Queued.as_str())
            .bind(JobStatus::Running.as_str())
            .fetch_optional(pool)
            .await
    }

    /// CAS any non-terminal state `-> CANCELLED`. Returns `None` when the
    /// job was already terminal (the caller reports the existing state).
    pub async fn cancel(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET status = $2, ended_at = NOW() \
             WHERE id = $1 AND status IN ($3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Cancelled.as_str())
            .bind(JobStatus::Created.as_str())
            .bind(JobStatus::Queued.as_str())
            .bind(JobStatus::Running.as_str())
            .fetch_optional(pool)
            .await
    }

    // ── Reaper ───────────────────────────────────────────────────────────

    /// Jobs currently attributed to a worker in `RUNNING` state.
    pub async fn running_on_worker(
        pool: &PgPool,
        worker_id: &str,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = $1 AND worker_id = $2"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Running.as_str())
            .bind(worker_id)
            .fetch_all(pool)
            .await
    }

    /// `RUNNING` jobs past their execution deadline plus `grace_secs`.
    pub async fn stuck_running(pool: &PgPool, grace_secs: i32) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = $1 \
               AND started_at IS NOT NULL \
               AND started_at + make_interval(secs => (timeout_seconds + $2)::double precision) < NOW()"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Running.as_str())
            .bind(grace_secs)
            .fetch_all(pool)
            .await
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Find a job by ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a user's jobs, newest first, with optional status/capability/
    /// since filters and pagination.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        params: &JobListQuery,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions = vec!["user_id = $1".to_string()];
        let mut bind_idx: u32 = 2;

        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.capability.is_some() {
            conditions.push(format!("capability = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.since.is_some() {
            conditions.push(format!("created_at >= ${bind_idx}"));
            bind_idx += 1;
        }

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE {} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            conditions.join(" AND "),
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query).bind(user_id);
        if let Some(status) = &params.status {
            q = q.bind(status);
        }
        if let Some(capability) = &params.capability {
            q = q.bind(capability);
        }
        if let Some(since) = params.since {
            q = q.bind(since);
        }

        q.bind(limit).bind(offset).fetch_all(pool).await
    }

}
