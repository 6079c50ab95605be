//! Settings types.
//!
//! All structs use `camelCase` JSON keys and `#[serde(default)]` so a
//! partial settings file only overrides the keys it names.

mod sections;

pub use sections::{AuthSettings, LoggingSettings, ServerSettings, StorageSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.lookout/settings.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LookoutSettings {
    /// Settings schema version.
    pub version: String,
    /// Instance name, used in logs.
    pub name: String,
    /// Network and signaling runtime.
    pub server: ServerSettings,
    /// Token verification and issuing.
    pub auth: AuthSettings,
    /// Durable storage.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for LookoutSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "lookout".to_string(),
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl LookoutSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be positive".into(),
            ));
        }
        if s.heartbeat_ceiling_secs <= s.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatCeilingSecs ({}) must exceed heartbeatIntervalSecs ({})",
                s.heartbeat_ceiling_secs, s.heartbeat_interval_secs
            )));
        }
        if s.max_connections == 0 || s.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections and server.sendQueueCapacity must be positive".into(),
            ));
        }
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret is not set (use LOOKOUT_JWT_SECRET)".into(),
            ));
        }
        Ok(())
    }
}
