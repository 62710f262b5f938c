use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_api::config::ServerConfig;
use tessera_api::engine::{CompletionHandler, Dispatcher, Reaper};
use tessera_api::rate_limit::RateLimiter;
use tessera_api::registry::WorkerRegistry;
use tessera_api::router::build_app_router;
use tessera_api::state::AppState;
use tessera_api::worker_client::WorkerClient;
use tessera_events::{EventBus, WebhookDispatcher};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = tessera_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    tessera_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    tessera_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- In-memory services ---
    let registry = Arc::new(WorkerRegistry::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let worker_client = Arc::new(WorkerClient::new());
    let event_bus = Arc::new(EventBus::default());

    // --- Webhook delivery ---
    let webhook_handle = tokio::spawn(WebhookDispatcher::run(
        config.webhook_secret.clone(),
        event_bus.subscribe(),
    ));

    // --- Completion handler, dispatcher, reaper ---
    let completion = Arc::new(CompletionHandler::new(
        pool.clone(),
        Arc::clone(&event_bus),
    ));

    let dispatcher_cancel = CancellationToken::new();
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        Arc::clone(&registry),
        Arc::clone(&worker_client),
        Arc::clone(&completion),
        Duration::from_millis(config.dispatch_interval_ms),
    ));
    let dispatcher_handle = tokio::spawn(dispatcher.run(dispatcher_cancel.clone()));

    let reaper_cancel = CancellationToken::new();
    let reaper = Arc::new(Reaper::new(
        pool.clone(),
        Arc::clone(&registry),
        Arc::clone(&completion),
        Duration::from_secs(config.reaper_interval_secs),
    ));
    let reaper_handle = tokio::spawn(reaper.run(reaper_cancel.clone()));

    tracing::info!("Background services started (webhooks, dispatcher, reaper)");

    // --- App state + router ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        registry,
        rate_limiter,
        event_bus: Arc::clone(&event_bus),
        worker_client,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop claiming new work first, then stop the reaper.
    dispatcher_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    reaper_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;
    tracing::info!("Dispatcher and reaper stopped");

    // Dropping every bus handle closes the broadcast channel, signalling
    // the webhook dispatcher to drain and exit.
    drop(completion);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), webhook_handle).await;
    tracing::info!("Webhook dispatcher stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
