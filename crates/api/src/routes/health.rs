//! Root-level health check, outside `/api/v1` and outside auth.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Whether the database pool is open. A deep ping is intentionally
    /// avoided here so load-balancer probes stay cheap.
    db_connected: bool,
    workers: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        db_connected: !state.pool.is_closed(),
        workers: state.registry.worker_count().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
