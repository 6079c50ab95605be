//! Telemetry reports emitted by broadcasters.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One visited page from a broadcaster's browser history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrowserVisit {
    /// Browser the visit was read from.
    #[serde(default)]
    pub browser: Option<String>,
    /// Visited URL.
    pub url: String,
    /// Page title, when the browser recorded one.
    #[serde(default)]
    pub title: Option<String>,
    /// Local visit time as reported by the client.
    #[serde(default)]
    pub visit_time: Option<String>,
}

/// A periodic status report from a broadcaster.
///
/// Known fields are typed; anything else the client sends is kept in
/// `extra` and forwarded untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    /// Client-side timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Host name of the broadcasting machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// System information blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    /// Running applications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps: Option<Value>,
    /// Foreground window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground: Option<Value>,
    /// Seconds since last user input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_seconds: Option<f64>,
    /// URL of the active browser tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_url: Option<String>,
    /// Whether the machine is considered idle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_idle: Option<bool>,
    /// Recently visited pages. Persisted, never forwarded live.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub browser_history: Vec<BrowserVisit>,
    /// Unrecognised fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryReport {
    /// Build the `data` object forwarded to live watchers.
    ///
    /// Drops `browser_history` and fills a missing timestamp with
    /// `received_at`.
    pub fn live_view(&self, received_at: DateTime<Utc>) -> Value {
        let mut view = self.clone();
        view.browser_history.clear();
        if view.timestamp.is_none() {
            view.timestamp = Some(received_at.to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        serde_json::to_value(view).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Idle flag, falling back to a non-zero idle threshold when the
    /// client did not send one.
    pub fn idle(&self) -> bool {
        self.is_idle
            .unwrap_or_else(|| self.idle_seconds.is_some_and(|s| s >= IDLE_THRESHOLD_SECS))
    }
}

/// Idle time after which a report without `is_idle` counts as idle.
pub const IDLE_THRESHOLD_SECS: f64 = 300.0;
