//! Handlers for the `/user` resource. Both endpoints require a user API key.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tessera_db::repositories::{PlanRepo, UsageRepo};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthPrincipal;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/user/me
///
/// The caller's identity, plan, and today's usage.
pub async fn me(
    principal: AuthPrincipal,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let user = principal.require_user()?;

    let mut conn = state.pool.acquire().await.map_err(AppError::Database)?;
    let plan = PlanRepo::find_by_id(&mut *conn, user.plan_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Plan {} missing", user.plan_id)))?;
    drop(conn);

    let usage_today = UsageRepo::for_day(&state.pool, user.id, Utc::now().date_naive()).await?;

    Ok(Json(DataResponse {
        data: serde_json::json!({
            "user": user,
            "plan": plan,
            "usage_today": usage_today,
        }),
    }))
}

/// Query parameters for `GET /api/v1/user/usage`.
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Number of days of history. Defaults to 30, capped at 90.
    pub days: Option<i64>,
}

/// GET /api/v1/user/usage
pub async fn usage(
    principal: AuthPrincipal,
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> AppResult<impl IntoResponse> {
    let user = principal.require_user()?;
    let days = query.days.unwrap_or(30).clamp(1, 90);

    let history = UsageRepo::history(&state.pool, user.id, days).await?;
    Ok(Json(DataResponse { data: history }))
}
