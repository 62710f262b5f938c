pub mod health;
pub mod internal;
pub mod jobs;
pub mod models;
pub mod user;

use axum::middleware::from_fn_with_state;
use axum::Router;

use crate::middleware::auth::authenticate;
use crate::middleware::rate_limit_headers::attach_rate_limit_headers;
use crate::state::AppState;

/// Build the `/api/v1` route tree (public surface).
///
/// Route hierarchy:
///
/// ```text
/// /jobs              create (POST), list (GET)
/// /jobs/{id}         status (GET), cancel (DELETE)
/// /user/me           current user + usage (GET)
/// /user/usage        usage history (GET)
/// /models            available models (GET)
/// ```
///
/// Every route requires `Authorization: Bearer` and carries the caller's
/// `X-RateLimit-*` headers on the way out.
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(jobs::router())
        .merge(user::router())
        .merge(models::router())
        .layer(from_fn_with_state(state.clone(), attach_rate_limit_headers))
        .layer(from_fn_with_state(state, authenticate))
}

/// Build the `/api/internal` route tree (worker-facing surface).
///
/// ```text
/// /heartbeat               worker liveness + state report (POST)
/// /workers/{id}/probe      operator health check (POST)
/// ```
pub fn internal_routes() -> Router<AppState> {
    internal::router()
}
