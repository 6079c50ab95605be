//! Runtime server configuration.

use std::time::Duration;

use lookout_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the signaling server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to (0 = auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Seconds between liveness sweeps.
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence after which a peer is evicted.
    pub heartbeat_ceiling_secs: u64,
    /// Upper bound on a single authorization call.
    pub authorizer_timeout_ms: u64,
    /// Grace period for in-flight tasks at shutdown.
    pub shutdown_timeout_secs: u64,
    /// Reject broadcasters that present no credential.
    pub require_broadcaster_token: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            send_queue_capacity: 256,
            max_message_size: 1024 * 1024,
            heartbeat_interval_secs: 60,
            heartbeat_ceiling_secs: 120,
            authorizer_timeout_ms: 5_000,
            shutdown_timeout_secs: 5,
            require_broadcaster_token: false,
        }
    }
}

impl ServerConfig {
    /// Liveness sweep period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Silence ceiling.
    pub fn heartbeat_ceiling(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ceiling_secs)
    }

    /// Authorization call timeout.
    pub fn authorizer_timeout(&self) -> Duration {
        Duration::from_millis(self.authorizer_timeout_ms)
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            send_queue_capacity: s.send_queue_capacity,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_ceiling_secs: s.heartbeat_ceiling_secs,
            authorizer_timeout_ms: s.authorizer_timeout_ms,
            shutdown_timeout_secs: s.shutdown_timeout_secs,
            require_broadcaster_token: s.require_broadcaster_token,
            ..Self::default()
        }
    }
}
