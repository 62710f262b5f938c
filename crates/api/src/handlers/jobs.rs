//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication. User-key callers see only their own
//! jobs; service-key callers (frontend bots) may address any job, since they
//! submitted it on a platform user's behalf.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tessera_core::error::CoreError;
use tessera_core::lifecycle::JobStatus;
use tessera_core::types::JobId;
use tessera_db::models::artifact::Artifact;
use tessera_db::models::job::{Job, JobListQuery};
use tessera_db::repositories::{ArtifactRepo, JobRepo};
use tessera_events::JobEvent;

use crate::admission::{self, JobRequest};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthPrincipal;
use crate::middleware::rate_limit_headers::ResolvedRateLimitUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A job plus its artifacts, as returned by the status endpoint. Artifacts
/// are only attached once the job is terminal.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub artifacts: Vec<Artifact>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job and verify the caller may act on it.
async fn find_and_authorize(
    state: &AppState,
    job_id: JobId,
    principal: &AuthPrincipal,
) -> AppResult<Job> {
    let job = JobRepo::find_by_id(&state.pool, job_id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
        })?;

    if let Some(user) = principal.user() {
        if job.user_id != user.id {
            // Existence of another user's job is not disclosed.
            return Err(AppError::Core(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            }));
        }
    }

    Ok(job)
}

/// Attach artifacts to a terminal job.
async fn job_view(state: &AppState, job: Job) -> AppResult<JobView> {
    let artifacts = if job.is_terminal() {
        ArtifactRepo::list_by_job(&state.pool, job.id).await?
    } else {
        Vec::new()
    };
    Ok(JobView { job, artifacts })
}

/// The client IP as reported by a fronting proxy.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Admit a job. Returns 201 with the admission receipt (queue position,
/// time estimate, cost) or the first admission failure. The billed user's
/// id rides out in a response extension so the rate-limit-header layer can
/// report the window even for service-key submissions.
pub async fn create_job(
    principal: AuthPrincipal,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<JobRequest>,
) -> AppResult<Response> {
    let capability = request.capability;
    let (receipt, user_id) =
        admission::admit(&state, &principal, request, client_ip(&headers)).await?;

    tracing::info!(
        job_id = %receipt.job_id,
        capability = %capability,
        user_id,
        cost_tokens = %receipt.cost_tokens,
        queue_position = receipt.queue_position,
        "Job admitted",
    );

    let mut response =
        (StatusCode::CREATED, Json(DataResponse { data: receipt })).into_response();
    response
        .extensions_mut()
        .insert(ResolvedRateLimitUser(user_id));
    Ok(response)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    principal: AuthPrincipal,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state, job_id, &principal).await?;
    let view = job_view(&state, job).await?;
    Ok(Json(DataResponse { data: view }))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List the caller's jobs. Requires a user API key: service principals have
/// no single user scope to list.
pub async fn list_jobs(
    principal: AuthPrincipal,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let user = principal.require_user()?;
    let jobs = JobRepo::list_for_user(&state.pool, user.id, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs/{id}
///
/// Cancel a job. Queued jobs cancel directly; running jobs are cancelled on
/// the authoritative record first, then the worker is asked to abort
/// (best-effort — its eventual reply loses the status CAS and is
/// discarded). Cancelling an already-terminal job is a no-op returning the
/// existing state.
pub async fn cancel_job(
    principal: AuthPrincipal,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state, job_id, &principal).await?;

    match JobRepo::cancel(&state.pool, job_id).await? {
        Some(cancelled) => {
            tracing::info!(job_id = %job_id, "Job cancelled");

            // Best-effort abort on the assigned worker.
            if let Some(worker_id) = cancelled.worker_id.clone() {
                if let Some(base_url) = state.registry.base_url_of(&worker_id).await {
                    let client = std::sync::Arc::clone(&state.worker_client);
                    tokio::spawn(async move {
                        if let Err(e) = client.abort_job(&base_url, job_id).await {
                            tracing::warn!(
                                job_id = %job_id,
                                worker_id = %worker_id,
                                error = %e,
                                "Abort signal failed (job already cancelled on record)",
                            );
                        }
                    });
                }
            }

            let data = serde_json::json!({ "job": cancelled, "artifacts": [] });
            state.event_bus.publish(
                JobEvent::new(JobStatus::Cancelled, cancelled.id, data)
                    .with_webhook_url(cancelled.webhook_url().map(str::to_string)),
            );

            let view = job_view(&state, cancelled).await?;
            Ok(Json(DataResponse { data: view }))
        }
        // Already terminal: idempotent no-op returning the current state.
        // Re-fetch, since the pre-check snapshot may predate the terminal
        // write that beat this cancel.
        None => {
            let current = JobRepo::find_by_id(&state.pool, job.id)
                .await?
                .unwrap_or(job);
            let view = job_view(&state, current).await?;
            Ok(Json(DataResponse { data: view }))
        }
    }
}
