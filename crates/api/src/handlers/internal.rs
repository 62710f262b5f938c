//! Internal API consumed by workers and operators. Not exposed publicly:
//! deploys front this under a network boundary, not user auth.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tessera_core::error::CoreError;

use crate::error::{AppError, AppResult};
use crate::registry::HeartbeatReport;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/internal/heartbeat
///
/// Upsert a worker's registry entry. Idempotent; a heartbeat from a worker
/// previously declared dead revives it.
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(report): Json<HeartbeatReport>,
) -> AppResult<impl IntoResponse> {
    let worker_id = report.worker_id.clone();
    state.registry.heartbeat(report).await;

    tracing::debug!(worker_id = %worker_id, "Heartbeat received");

    Ok(Json(json!({
        "ack": true,
        "dispatcher_version": env!("CARGO_PKG_VERSION"),
    })))
}

/// POST /api/internal/workers/{id}/probe
///
/// Operator-initiated health check. A successful probe clears quarantine;
/// a failed one reports the worker unhealthy and leaves it quarantined.
pub async fn probe_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let base_url = state
        .registry
        .base_url_of(&worker_id)
        .await
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Worker",
                id: worker_id.clone(),
            })
        })?;

    match state.worker_client.health(&base_url).await {
        Ok(()) => {
            state.registry.clear_quarantine(&worker_id).await;
            tracing::info!(worker_id, "Probe succeeded, quarantine cleared");

            // Refresh the declared capability sheet while we're here.
            let capabilities = state
                .worker_client
                .capabilities(&base_url)
                .await
                .unwrap_or(serde_json::Value::Null);

            Ok(Json(DataResponse {
                data: json!({
                    "worker_id": worker_id,
                    "healthy": true,
                    "capabilities": capabilities,
                }),
            }))
        }
        Err(err) => {
            tracing::warn!(worker_id, error = %err, "Probe failed");
            Ok(Json(DataResponse {
                data: json!({ "worker_id": worker_id, "healthy": false }),
            }))
        }
    }
}

/// POST /api/internal/users/{id}/api-key
///
/// Operator-issued user API key. The plaintext is returned exactly once;
/// only its SHA-256 digest is stored.
pub async fn issue_api_key(
    State(state): State<AppState>,
    Path(user_id): Path<tessera_core::types::DbId>,
) -> AppResult<impl IntoResponse> {
    let key = tessera_core::signing::generate_api_key();

    let user = tessera_db::repositories::UserRepo::set_api_key(
        &state.pool,
        user_id,
        &key.hash,
        &key.prefix,
    )
    .await?
    .ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "User",
            id: user_id.to_string(),
        })
    })?;

    tracing::info!(user_id = user.id, prefix = %key.prefix, "API key issued");

    Ok(Json(DataResponse {
        data: json!({
            "user_id": user.id,
            "api_key": key.plaintext,
            "prefix": key.prefix,
        }),
    }))
}
