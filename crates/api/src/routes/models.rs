//! Route definition for the `/models` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::models;
use crate::state::AppState;

/// Routes mounted at `/models`.
pub fn router() -> Router<AppState> {
    Router::new().route("/models", get(models::list_models))
}
