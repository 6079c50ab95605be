//! # lookout-logging
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] built from
//! the configured level (`RUST_LOG` wins when set) and a fmt layer that
//! writes either human-readable or JSON lines to stdout.

#![deny(unsafe_code)]

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Logging configuration.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level, or a full filter directive such as `info,lookout_server=debug`.
    pub level: String,
    /// Per-module level overrides appended to the directive.
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub fn directive(&self) -> String {
        let mut filter = self.level.trim().to_lowercase();
        if filter.is_empty() {
            filter.push_str("info");
        }
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Install the global subscriber. Call once at startup.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directive()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_defaults_to_info() {
        let config = LoggingConfig {
            level: "  ".into(),
            ..LoggingConfig::default()
        };
        assert_eq!(config.directive(), "info");
    }

    #[test]
    fn directive_appends_module_levels() {
        let config = LoggingConfig {
            level: "WARN".into(),
            module_levels: vec![("lookout_server".into(), Level::DEBUG)],
            json: false,
        };
        assert_eq!(config.directive(), "warn,lookout_server=debug");
    }

    #[test]
    fn second_init_is_rejected() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
