use std::sync::Arc;

use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::registry::WorkerRegistry;
use crate::worker_client::WorkerClient;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool. The database is the source of truth.
    pub pool: tessera_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// In-memory worker liveness and capability tracking.
    pub registry: Arc<WorkerRegistry>,
    /// Per-user sliding-window rate limiter (advisory, per-instance).
    pub rate_limiter: Arc<RateLimiter>,
    /// Terminal-transition event bus feeding webhook delivery.
    pub event_bus: Arc<tessera_events::EventBus>,
    /// HTTP client for dispatch, abort, and probe calls to workers.
    pub worker_client: Arc<WorkerClient>,
}
