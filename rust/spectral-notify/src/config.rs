//! Configuration management for SpectralNotify.
//!
//! Configuration is loaded from defaults, an optional config file
//! (`config/spectral-notify.{yaml,toml,json}`), and `SPECTRAL`-prefixed
//! environment variables (`SPECTRAL__SERVER__PORT=9090`), with a handful
//! of well-known plain variables (`SPECTRAL_API_KEY`, `SPECTRAL_DB_PATH`)
//! applied last.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Write authentication.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Embedded database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Idempotency store configuration.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// WebSocket fan-out configuration.
    #[serde(default)]
    pub websocket: WebSocketConfig,
    /// Workflow state-machine options.
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Gateway options (rate limiting).
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Load configuration from environment and config files.
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/spectral-notify").required(false))
            .add_source(
                config::Environment::with_prefix("SPECTRAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        // Well-known plain environment variables override everything.
        if let Ok(key) = std::env::var("SPECTRAL_API_KEY") {
            if !key.is_empty() {
                app_config.auth.api_key = Some(key);
            }
        }
        if let Ok(path) = std::env::var("SPECTRAL_DB_PATH") {
            app_config.database.path = path;
        }

        Ok(app_config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Main API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Write-handler timeout in seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

/// Write authentication configuration.
///
/// When no API key is configured the broker accepts unauthenticated
/// writes and logs a startup warning (development mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Expected `X-API-Key` value for write endpoints.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Embedded database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Idempotency store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Row time-to-live in seconds.
    #[serde(default = "default_idempotency_ttl")]
    pub ttl_secs: i64,
    /// Maximum expired rows reaped opportunistically per write.
    #[serde(default = "default_reap_batch")]
    pub reap_batch: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl(),
            reap_batch: default_reap_batch(),
        }
    }
}

/// WebSocket fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Server ping interval in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Close sockets with no client frame for this long.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Per-socket send timeout in seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Per-socket outbound buffer depth before backpressure eviction.
    #[serde(default = "default_send_buffer")]
    pub send_buffer: usize,
    /// Maximum live subscribers per instance.
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            idle_timeout_secs: default_idle_timeout(),
            send_timeout_secs: default_send_timeout(),
            send_buffer: default_send_buffer(),
            max_subscribers: default_max_subscribers(),
        }
    }
}

/// Workflow state-machine options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// When true, `complete` is rejected while any phase is non-terminal
    /// instead of auto-completing the remaining phases.
    #[serde(default)]
    pub strict_complete: bool,
}

/// Gateway options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Global write-path rate limit in requests per second; 0 disables.
    #[serde(default)]
    pub rate_limit_per_second: u32,
    /// Burst allowance for the write-path rate limit.
    #[serde(default = "default_rate_burst")]
    pub rate_limit_burst: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_write_timeout() -> u64 {
    10
}

fn default_db_path() -> String {
    "./data/spectral-notify.db".to_string()
}

fn default_idempotency_ttl() -> i64 {
    24 * 60 * 60
}

fn default_reap_batch() -> usize {
    32
}

fn default_ping_interval() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    90
}

fn default_send_timeout() -> u64 {
    5
}

fn default_send_buffer() -> usize {
    64
}

fn default_max_subscribers() -> usize {
    256
}

fn default_rate_burst() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = AppConfig::default();
        assert_eq!(config.server.write_timeout_secs, 10);
        assert_eq!(config.idempotency.ttl_secs, 86_400);
        assert_eq!(config.idempotency.reap_batch, 32);
        assert_eq!(config.websocket.ping_interval_secs, 30);
        assert_eq!(config.websocket.idle_timeout_secs, 90);
        assert_eq!(config.websocket.send_timeout_secs, 5);
        assert_eq!(config.websocket.send_buffer, 64);
        assert!(!config.workflow.strict_complete);
        assert_eq!(config.gateway.rate_limit_per_second, 0);
    }
}
