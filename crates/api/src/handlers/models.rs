//! Handler for `GET /api/v1/models`: the models the platform currently
//! serves, derived from live worker reports plus configured statics.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::middleware::auth::AuthPrincipal;
use crate::registry::ModelInfo;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/models
pub async fn list_models(
    _principal: AuthPrincipal,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let mut models = state.registry.model_overview().await;

    // Statically configured models the fleet has not loaded yet still
    // exist from the caller's point of view.
    for name in &state.config.static_models {
        if !models.iter().any(|m| &m.model == name) {
            models.push(ModelInfo {
                model: name.clone(),
                capabilities: Vec::new(),
                workers: 0,
                resident_on_idle: false,
            });
        }
    }
    models.sort_by(|a, b| a.model.cmp(&b.model));

    Ok(Json(DataResponse { data: models }))
}
