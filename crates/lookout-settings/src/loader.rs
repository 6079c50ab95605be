//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LookoutSettings::default()`]
//! 2. If `~/.lookout/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `LOOKOUT_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::LookoutSettings;

/// Directory holding Lookout state (`~/.lookout`).
pub fn lookout_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".lookout")
}

/// Resolve the path to the settings file (`~/.lookout/settings.json`).
pub fn settings_path() -> PathBuf {
    lookout_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LookoutSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid
/// combination of values is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LookoutSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<LookoutSettings> {
    let defaults = serde_json::to_value(LookoutSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `LOOKOUT_*` environment variable overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut LookoutSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (normally `std::env::var`).
pub fn apply_overrides(settings: &mut LookoutSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("LOOKOUT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("LOOKOUT_PORT") {
        if let Some(n) = parse_u16_range(&v, 1, 65535) {
            settings.server.port = n;
        } else {
            warn!(key = "LOOKOUT_PORT", value = %v, "invalid port env var, ignoring");
        }
    }
    if let Some(v) = read("LOOKOUT_HEARTBEAT_INTERVAL_SECS") {
        if let Some(n) = parse_u64_range(&v, 1, 3600) {
            settings.server.heartbeat_interval_secs = n;
        } else {
            warn!(key = "LOOKOUT_HEARTBEAT_INTERVAL_SECS", value = %v, "invalid u64 env var, ignoring");
        }
    }
    if let Some(v) = read("LOOKOUT_HEARTBEAT_CEILING_SECS") {
        if let Some(n) = parse_u64_range(&v, 2, 7200) {
            settings.server.heartbeat_ceiling_secs = n;
        } else {
            warn!(key = "LOOKOUT_HEARTBEAT_CEILING_SECS", value = %v, "invalid u64 env var, ignoring");
        }
    }
    if let Some(v) = read("LOOKOUT_MAX_CONNECTIONS") {
        if let Some(n) = parse_usize_range(&v, 1, 1_000_000) {
            settings.server.max_connections = n;
        } else {
            warn!(key = "LOOKOUT_MAX_CONNECTIONS", value = %v, "invalid usize env var, ignoring");
        }
    }
    if let Some(v) = read("LOOKOUT_REQUIRE_BROADCASTER_TOKEN") {
        if let Some(b) = parse_bool(&v) {
            settings.server.require_broadcaster_token = b;
        } else {
            warn!(key = "LOOKOUT_REQUIRE_BROADCASTER_TOKEN", value = %v, "invalid boolean env var, ignoring");
        }
    }
    if let Some(v) = read("LOOKOUT_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read("LOOKOUT_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read("LOOKOUT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("LOOKOUT_LOG_JSON") {
        if let Some(b) = parse_bool(&v) {
            settings.logging.json = b;
        } else {
            warn!(key = "LOOKOUT_LOG_JSON", value = %v, "invalid boolean env var, ignoring");
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4, 5]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.heartbeat_interval_secs, 60);
        assert_eq!(settings.server.heartbeat_ceiling_secs, 120);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "storage": {"retentionDays": 30}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.storage.retention_days, 30);
        assert_eq!(settings.storage.db_path, "lookout.db");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_inverted_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalSecs": 90, "heartbeatCeilingSecs": 30}}"#,
        )
        .unwrap();

        let mut settings = load_file_layer(&path).unwrap();
        apply_overrides(&mut settings, env(&[]));
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn defaults_without_secret_fail_validation() {
        let mut settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        apply_overrides(&mut settings, env(&[]));
        assert!(settings.auth.jwt_secret.is_empty());
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("jwtSecret")
        ));
    }

    #[test]
    fn secret_from_env_passes_validation() {
        let mut settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        apply_overrides(&mut settings, env(&[("LOOKOUT_JWT_SECRET", "from-env")]));
        settings.validate().unwrap();
        assert_eq!(settings.auth.jwt_secret, "from-env");
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_valid_values() {
        let mut settings = LookoutSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("LOOKOUT_PORT", "9443"),
                ("LOOKOUT_HOST", "127.0.0.1"),
                ("LOOKOUT_HEARTBEAT_INTERVAL_SECS", "15"),
                ("LOOKOUT_HEARTBEAT_CEILING_SECS", "45"),
                ("LOOKOUT_MAX_CONNECTIONS", "50"),
                ("LOOKOUT_REQUIRE_BROADCASTER_TOKEN", "yes"),
                ("LOOKOUT_JWT_SECRET", "s3cret"),
                ("LOOKOUT_DB_PATH", "/var/lib/lookout.db"),
                ("LOOKOUT_LOG_LEVEL", "debug"),
                ("LOOKOUT_LOG_JSON", "1"),
            ]),
        );
        assert_eq!(settings.server.port, 9443);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.heartbeat_interval_secs, 15);
        assert_eq!(settings.server.heartbeat_ceiling_secs, 45);
        assert_eq!(settings.server.max_connections, 50);
        assert!(settings.server.require_broadcaster_token);
        assert_eq!(settings.auth.jwt_secret, "s3cret");
        assert_eq!(settings.storage.db_path, "/var/lib/lookout.db");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut settings = LookoutSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("LOOKOUT_PORT", "0"),
                ("LOOKOUT_MAX_CONNECTIONS", "lots"),
                ("LOOKOUT_LOG_JSON", "maybe"),
                ("LOOKOUT_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.max_connections, 10_000);
        assert!(!settings.logging.json);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("65535", 1, 65535), Some(65535));
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("abc", 1, 10_000), None);
    }
}
