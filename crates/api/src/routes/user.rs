//! Route definitions for the `/user` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::users;
use crate::state::AppState;

/// Routes mounted at `/user`.
///
/// ```text
/// GET /user/me     -> me
/// GET /user/usage  -> usage
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/me", get(users::me))
        .route("/user/usage", get(users::usage))
}
