//! Route definitions for the internal (worker-facing) API.

use axum::routing::post;
use axum::Router;

use crate::handlers::internal;
use crate::state::AppState;

/// Routes mounted at `/api/internal`.
///
/// ```text
/// POST /heartbeat            -> heartbeat
/// POST /workers/{id}/probe   -> probe_worker
/// POST /users/{id}/api-key   -> issue_api_key
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/heartbeat", post(internal::heartbeat))
        .route("/workers/{id}/probe", post(internal::probe_worker))
        .route("/users/{id}/api-key", post(internal::issue_api_key))
}
