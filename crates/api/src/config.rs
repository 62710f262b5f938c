//! Server configuration loaded from environment variables.

/// Control-plane configuration.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Shared secret for webhook HMAC signatures.
    pub webhook_secret: String,
    /// Bearer keys granted to frontend services (bots), which may submit
    /// jobs on behalf of any platform user.
    pub service_keys: Vec<String>,
    /// Models served by the platform in addition to whatever workers report
    /// as loaded. Used for admission's unknown-model check.
    pub static_models: Vec<String>,
    /// Dispatcher tick interval in milliseconds (default: `1000`).
    pub dispatch_interval_ms: u64,
    /// Reaper sweep interval in seconds (default: `10`).
    pub reaper_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `8000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `TESSERA_WEBHOOK_SECRET`| `tessera-dev-secret`    |
    /// | `TESSERA_SERVICE_KEYS`  | (empty)                 |
    /// | `TESSERA_MODELS`        | (empty)                 |
    /// | `DISPATCH_INTERVAL_MS`  | `1000`                  |
    /// | `REAPER_INTERVAL_SECS`  | `10`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let webhook_secret = std::env::var("TESSERA_WEBHOOK_SECRET")
            .unwrap_or_else(|_| "tessera-dev-secret".into());

        let dispatch_interval_ms: u64 = std::env::var("DISPATCH_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("DISPATCH_INTERVAL_MS must be a valid u64");

        let reaper_interval_secs: u64 = std::env::var("REAPER_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("REAPER_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins: csv_env("CORS_ORIGINS", "http://localhost:5173"),
            request_timeout_secs,
            webhook_secret,
            service_keys: csv_env("TESSERA_SERVICE_KEYS", ""),
            static_models: csv_env("TESSERA_MODELS", ""),
            dispatch_interval_ms,
            reaper_interval_secs,
        }
    }

    /// Whether a bearer token is one of the configured service keys.
    pub fn is_service_key(&self, token: &str) -> bool {
        self.service_keys.iter().any(|k| k == token)
    }
}

/// Parse a comma-separated env var, dropping empty segments.
fn csv_env(name: &str, default: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_else(|_| default.into())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
