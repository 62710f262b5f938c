//! Postgres persistence for the Tessera control plane.
//!
//! The database is the single source of truth for plans, users, jobs,
//! artifacts, and daily usage; no in-process cache shadows canonical state.
//! Repositories perform status changes via compare-and-swap updates so
//! concurrent illegal transitions lose the race cleanly.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Backoff schedule for transient storage errors, milliseconds.
const RETRY_BACKOFF_MS: [u64; 3] = [100, 400, 1600];

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Create a pool that connects on first use instead of eagerly.
///
/// Used by integration tests that exercise routes which never touch the
/// database.
pub fn create_lazy_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(4)
        .connect_lazy(database_url)
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Run a storage operation with bounded retry on transient errors.
///
/// Up to three retries with 100/400/1600 ms backoff. Only I/O-level failures
/// are retried; anything the database itself rejected is returned
/// immediately.
pub async fn with_retry<T, F, Fut>(operation_name: &str, mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    for backoff_ms in RETRY_BACKOFF_MS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                tracing::warn!(
                    operation = operation_name,
                    backoff_ms,
                    error = %err,
                    "Transient storage error, retrying",
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
            Err(err) => return Err(err),
        }
    }

    op().await
}

/// Whether an error is worth retrying (connection-level, not semantic).
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}
