//! Gateway configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`). Missing or unparsable values fall back to defaults; only a
//! malformed `LISTEN_ADDR` is fatal.

use std::net::SocketAddr;
use std::time::Duration;

use crate::ws::ConnectionSettings;

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,

    /// Seconds between heartbeat sweeps.
    pub heartbeat_interval_secs: u64,

    /// Seconds of inactivity after which a connection is closed.
    pub heartbeat_timeout_secs: u64,

    /// Privileged messages tolerated before authentication.
    pub max_unauthenticated_messages: u32,

    /// Soft deadline for a single handler invocation, in milliseconds.
    pub handler_timeout_ms: u64,

    /// Deadline for REST requests, in seconds.
    pub request_timeout_secs: u64,

    /// Whether emitted events are appended to the event log.
    pub event_log_enabled: bool,

    /// PostgreSQL connection string. `None` selects the in-memory log.
    pub database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// HS256 secret for bearer tokens. `None` selects static tokens.
    pub auth_jwt_secret: Option<String>,

    /// Static `token=user` pairs, comma separated.
    pub auth_static_tokens: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_json: false,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_unauthenticated_messages: 5,
            handler_timeout_ms: 5_000,
            request_timeout_secs: 30,
            event_log_enabled: true,
            database_url: None,
            database_max_connections: 10,
            auth_jwt_secret: None,
            auth_static_tokens: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(addr) => addr.parse()?,
            Err(_) => defaults.listen_addr,
        };

        Ok(Self {
            listen_addr,
            log_json: std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
            heartbeat_interval_secs: parse_env(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            ),
            heartbeat_timeout_secs: parse_env(
                "HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout_secs,
            ),
            max_unauthenticated_messages: parse_env(
                "MAX_UNAUTHENTICATED_MESSAGES",
                defaults.max_unauthenticated_messages,
            ),
            handler_timeout_ms: parse_env("HANDLER_TIMEOUT_MS", defaults.handler_timeout_ms),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            event_log_enabled: parse_env_bool("EVENT_LOG_ENABLED", defaults.event_log_enabled),
            database_url: non_empty_env("DATABASE_URL"),
            database_max_connections: parse_env(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            auth_jwt_secret: non_empty_env("AUTH_JWT_SECRET"),
            auth_static_tokens: std::env::var("AUTH_STATIC_TOKENS").unwrap_or_default(),
        })
    }

    /// Connection handling settings derived from this configuration.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            idle_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            max_unauthenticated_messages: self.max_unauthenticated_messages,
            ..ConnectionSettings::default()
        }
    }

    /// Per-handler soft deadline.
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// REST request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
