//! Telemetry fan-out to watching viewers, plus hand-off to persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use lookout_core::{
    BroadcasterId, InstallationId, OutboundMessage, SessionId, TelemetryReport,
};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::error::CollaboratorError;
use crate::metrics::{
    TELEMETRY_DELIVERED_TOTAL, TELEMETRY_PERSIST_ERRORS_TOTAL, TELEMETRY_REVOKED_TOTAL,
};

use super::directory::Directory;
use super::gate::PermissionGate;
use super::registry::Registry;

/// Message sent to a viewer whose permission was withdrawn mid-stream.
pub const PERMISSION_REVOKED: &str = "permission to watch this broadcaster was revoked";

/// Where a stored report came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetrySource {
    /// Reporting session.
    pub session_id: SessionId,
    /// Durable broadcaster id.
    pub broadcaster_id: BroadcasterId,
    /// Installation the report belongs to.
    pub installation_id: Option<InstallationId>,
}

/// Durable telemetry storage.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Store one report.
    async fn record(
        &self,
        source: TelemetrySource,
        report: Arc<TelemetryReport>,
        received_at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError>;
}

/// Counters for one fan-out cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    /// Viewers the frame was queued for.
    pub delivered: usize,
    /// Viewers whose link was cleared for lack of permission.
    pub revoked: usize,
    /// Viewers whose queue rejected the frame.
    pub dropped: usize,
    /// A persistence task was started.
    pub persisted: bool,
}

/// Delivers each report to the viewers watching its broadcaster.
pub struct TelemetryFanout {
    registry: Arc<Registry>,
    directory: Arc<Directory>,
    gate: Arc<PermissionGate>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl TelemetryFanout {
    /// Create a fan-out. Without a sink, reports are only forwarded.
    pub fn new(
        registry: Arc<Registry>,
        directory: Arc<Directory>,
        gate: Arc<PermissionGate>,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        Self {
            registry,
            directory,
            gate,
            sink,
        }
    }

    /// Fan `report` from `broadcaster` out to its watchers.
    ///
    /// Each watcher's permission is re-checked. Viewers that lost it are
    /// unlinked and told once. Persistence runs in the background and
    /// never delays delivery.
    pub async fn publish(&self, broadcaster: &SessionId, report: TelemetryReport) -> FanoutSummary {
        let mut summary = FanoutSummary::default();
        let Some(entry) = self.directory.get(broadcaster) else {
            debug!(session_id = %broadcaster, "telemetry from unpublished session ignored");
            return summary;
        };
        let received_at = Utc::now();
        let report = Arc::new(report);

        if let (Some(sink), Some(directory_id)) = (&self.sink, &entry.directory_id) {
            let sink = sink.clone();
            let source = TelemetrySource {
                session_id: broadcaster.clone(),
                broadcaster_id: directory_id.clone(),
                installation_id: entry.installation_id.clone(),
            };
            let stored = report.clone();
            let _ = tokio::spawn(async move {
                if let Err(e) = sink.record(source.clone(), stored, received_at).await {
                    counter!(TELEMETRY_PERSIST_ERRORS_TOTAL).increment(1);
                    warn!(
                        broadcaster_id = %source.broadcaster_id,
                        error = %e,
                        "failed to persist telemetry"
                    );
                }
            });
            summary.persisted = true;
        }

        let watchers = self.registry.watchers_of(broadcaster);
        if watchers.is_empty() {
            return summary;
        }

        let frame = OutboundMessage::Monitoring {
            broadcaster_id: broadcaster.clone(),
            data: report.live_view(received_at),
        };
        let frame = match frame.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(session_id = %broadcaster, error = %e, "failed to encode telemetry");
                return summary;
            }
        };

        let directory_id = entry.directory_id.as_ref();
        let checks = join_all(watchers.iter().map(|viewer| async move {
            (
                viewer,
                self.gate.may_watch(viewer.viewer(), directory_id).await,
            )
        }))
        .await;

        for (viewer, allowed) in checks {
            if allowed {
                // The link may have moved while the permission check ran.
                if !viewer.is_watching(broadcaster) {
                    continue;
                }
                if viewer.connection().send(frame.clone()) {
                    summary.delivered += 1;
                } else {
                    summary.dropped += 1;
                }
            } else if viewer.unwatch_if(broadcaster) {
                summary.revoked += 1;
                info!(
                    viewer_id = %viewer.id(),
                    broadcaster = %broadcaster,
                    "watch permission revoked, unlinking viewer"
                );
                let _ = viewer
                    .connection()
                    .send_message(&OutboundMessage::error(PERMISSION_REVOKED));
            }
        }

        counter!(TELEMETRY_DELIVERED_TOTAL).increment(summary.delivered as u64);
        counter!(TELEMETRY_REVOKED_TOTAL).increment(summary.revoked as u64);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::signaling::directory::BroadcasterInfo;
    use crate::signaling::peer::{AdmittedRole, PeerRole};
    use crate::test_support::{StaticAuthorizer, broadcaster_identity, connection, drain, viewer};
    use crate::websocket::connection::Outbound;
    use lookout_core::GroupId;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<(TelemetrySource, Arc<TelemetryReport>)>);

    #[async_trait]
    impl TelemetrySink for ChannelSink {
        async fn record(
            &self,
            source: TelemetrySource,
            report: Arc<TelemetryReport>,
            _received_at: DateTime<Utc>,
        ) -> Result<(), CollaboratorError> {
            let _ = self.0.send((source, report));
            Ok(())
        }
    }

    struct Fixture {
        auth: Arc<StaticAuthorizer>,
        registry: Arc<Registry>,
        fanout: TelemetryFanout,
        stored: mpsc::UnboundedReceiver<(TelemetrySource, Arc<TelemetryReport>)>,
        _broadcaster_rx: mpsc::Receiver<Outbound>,
    }

    fn fixture(durable: Option<&str>) -> Fixture {
        let auth = Arc::new(StaticAuthorizer::default());
        let registry = Arc::new(Registry::new(100));
        let directory = Arc::new(Directory::new(registry.clone(), false));
        let gate = Arc::new(PermissionGate::new(auth.clone(), Duration::from_secs(1)));
        let (tx, stored) = mpsc::unbounded_channel();
        let (conn, broadcaster_rx) = connection("peer_b");
        let _ = registry.register(conn, AdmittedRole::Broadcaster, None).unwrap();
        let _ = directory
            .publish(
                &SessionId::from_raw("peer_b"),
                BroadcasterInfo {
                    display_name: "Desk-7".into(),
                    group_id: GroupId::from_raw("-1"),
                    monitor_number: 1,
                    identity: durable.map(broadcaster_identity),
                },
            )
            .unwrap();
        let fanout = TelemetryFanout::new(
            registry.clone(),
            directory,
            gate,
            Some(Arc::new(ChannelSink(tx))),
        );
        Fixture {
            auth,
            registry,
            fanout,
            stored,
            _broadcaster_rx: broadcaster_rx,
        }
    }

    fn watcher(f: &Fixture, id: &str, user: &str) -> mpsc::Receiver<Outbound> {
        let (conn, rx) = connection(id);
        let peer = f
            .registry
            .register(conn, AdmittedRole::Viewer, Some(viewer(user)))
            .unwrap();
        peer.state().role = PeerRole::Viewer;
        let _ = peer.watch(SessionId::from_raw("peer_b"));
        rx
    }

    fn report() -> TelemetryReport {
        serde_json::from_value(json!({
            "host": "desk-7",
            "active_url": "https://example.com",
            "browser_history": [{"url": "https://a", "visit_time": "t1"}],
        }))
        .unwrap()
    }

    fn sid(s: &str) -> SessionId {
        SessionId::from_raw(s)
    }

    #[tokio::test]
    async fn permitted_watcher_receives_live_view() {
        let mut f = fixture(Some("bc_1"));
        f.auth.grant("u1", "bc_1");
        let mut rx = watcher(&f, "peer_v", "u1");

        let summary = f.fanout.publish(&sid("peer_b"), report()).await;
        assert_eq!(summary.delivered, 1);
        assert!(summary.persisted);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "monitoring");
        assert_eq!(frames[0]["broadcasterId"], "peer_b");
        assert_eq!(frames[0]["data"]["host"], "desk-7");
        assert!(frames[0]["data"].get("browser_history").is_none());
        assert!(frames[0]["data"]["timestamp"].is_string());

        let (source, stored) = tokio::time::timeout(Duration::from_secs(1), f.stored.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.broadcaster_id.as_str(), "bc_1");
        assert_eq!(source.installation_id.unwrap().as_str(), "bc_1#1");
        assert_eq!(stored.browser_history.len(), 1);
    }

    #[tokio::test]
    async fn revoked_watcher_is_unlinked_and_told_once() {
        let f = fixture(Some("bc_1"));
        f.auth.grant("u1", "bc_1");
        let mut rx = watcher(&f, "peer_v", "u1");

        let _ = f.fanout.publish(&sid("peer_b"), report()).await;
        f.auth.revoke("u1", "bc_1");
        let summary = f.fanout.publish(&sid("peer_b"), report()).await;
        assert_eq!(summary.revoked, 1);
        let again = f.fanout.publish(&sid("peer_b"), report()).await;
        assert_eq!(again, FanoutSummary { persisted: true, ..FanoutSummary::default() });

        let frames = drain(&mut rx);
        let kinds: Vec<_> = frames.iter().map(|v| v["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["monitoring", "error"]);
        assert_eq!(frames[1]["message"], PERMISSION_REVOKED);
        assert!(f.registry.get(&sid("peer_v")).unwrap().watching().is_none());
    }

    #[tokio::test]
    async fn viewer_watching_elsewhere_gets_nothing() {
        let f = fixture(Some("bc_1"));
        f.auth.grant("u1", "bc_1");
        let mut rx = watcher(&f, "peer_v", "u1");
        let _ = f
            .registry
            .get(&sid("peer_v"))
            .unwrap()
            .watch(sid("peer_other"));
        let summary = f.fanout.publish(&sid("peer_b"), report()).await;
        assert_eq!(summary.delivered, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn anonymous_broadcaster_is_not_persisted() {
        let mut f = fixture(None);
        let summary = f.fanout.publish(&sid("peer_b"), report()).await;
        assert!(!summary.persisted);
        assert!(f.stored.try_recv().is_err());
    }

    #[tokio::test]
    async fn unpublished_session_is_ignored() {
        let f = fixture(Some("bc_1"));
        let summary = f.fanout.publish(&sid("peer_unknown"), report()).await;
        assert_eq!(summary, FanoutSummary::default());
    }
}
