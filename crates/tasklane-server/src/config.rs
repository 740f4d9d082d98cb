// Server configuration from environment variables

use std::time::Duration;

/// Runtime configuration, loaded from the environment with defaults that
/// suit local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address (BIND_ADDR)
    pub bind_addr: String,

    /// PostgreSQL URL (DATABASE_URL); in-memory stores when unset
    pub database_url: Option<String>,

    /// Reminder scan interval (SCHEDULER_INTERVAL_SECS)
    pub scheduler_interval: Duration,

    /// Sync replay lookback window (REPLAY_WINDOW_SECS)
    pub replay_window: Duration,

    /// Shared secret for the real-time handshake (SYNC_AUTH_TOKEN);
    /// unset means tokens are trusted as-is (development only)
    pub auth_token: Option<String>,

    /// Webhook delivery endpoint (WEBHOOK_ENDPOINT); channel disabled
    /// when unset
    pub webhook_endpoint: Option<String>,

    /// Comma-separated CORS origins (CORS_ALLOWED_ORIGINS)
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string()),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            scheduler_interval: Duration::from_secs(env_u64("SCHEDULER_INTERVAL_SECS", 60)),
            replay_window: Duration::from_secs(env_u64("REPLAY_WINDOW_SECS", 3600)),
            auth_token: std::env::var("SYNC_AUTH_TOKEN").ok().filter(|s| !s.is_empty()),
            webhook_endpoint: std::env::var("WEBHOOK_ENDPOINT").ok().filter(|s| !s.is_empty()),
            cors_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|origin| origin.trim().to_string())
                        .filter(|origin| !origin.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
