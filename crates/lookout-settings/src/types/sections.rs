//! Server, auth, storage and logging sections.

use serde::{Deserialize, Serialize};

/// Network and signaling runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP/WebSocket port.
    pub port: u16,
    /// Seconds between liveness sweeps.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a peer is reaped.
    pub heartbeat_ceiling_secs: u64,
    /// Maximum number of simultaneously registered connections.
    pub max_connections: usize,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Upper bound on one authorization lookup.
    pub authorizer_timeout_ms: u64,
    /// How long shutdown waits for connection tasks.
    pub shutdown_timeout_secs: u64,
    /// Reject broadcasters that present no token.
    pub require_broadcaster_token: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_interval_secs: 60,
            heartbeat_ceiling_secs: 120,
            max_connections: 10_000,
            send_queue_capacity: 256,
            authorizer_timeout_ms: 5_000,
            shutdown_timeout_secs: 5,
            require_broadcaster_token: false,
        }
    }
}

/// Token settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret for HS256 tokens. No default; must come from the
    /// settings file or `LOOKOUT_JWT_SECRET`.
    pub jwt_secret: String,
    /// Lifetime of tokens issued to broadcasters.
    pub broadcaster_token_days: i64,
    /// Lifetime of one-time installation tokens.
    pub installation_token_hours: i64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            broadcaster_token_days: 60,
            installation_token_hours: 24,
        }
    }
}

/// Durable storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite database path (relative to `~/.lookout`).
    pub db_path: String,
    /// Activity retention in days.
    pub retention_days: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "lookout.db".to_string(),
            retention_days: 90,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
