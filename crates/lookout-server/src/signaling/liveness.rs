//! Heartbeat pings and eviction of silent peers.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::websocket::connection::SendFailure;

use super::peer::{Peer, PeerRole};
use super::registry::Registry;

/// Ping period and silence ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Silence after which a peer is evicted.
    pub ceiling: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            ceiling: Duration::from_secs(120),
        }
    }
}

/// What one sweep found.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Peers silent past the ceiling.
    pub expired: Vec<Arc<Peer>>,
    /// Peers whose connection could no longer take a ping.
    pub failed: Vec<Arc<Peer>>,
    /// Pings queued.
    pub pinged: usize,
    /// Peers whose queue was full; they count as alive but backlogged.
    pub backlogged: usize,
    /// Broadcasters seen.
    pub broadcasters: usize,
    /// Viewers seen.
    pub viewers: usize,
}

/// Sends pings and decides which peers to evict.
///
/// The monitor only classifies; the caller closes connections and runs
/// the disconnect cascade for `expired` and `failed` peers.
pub struct LivenessMonitor {
    registry: Arc<Registry>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    /// Monitor `registry` with `config`.
    pub fn new(registry: Arc<Registry>, config: LivenessConfig) -> Self {
        Self { registry, config }
    }

    /// Ping and sweep period.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Run one sweep at `now`.
    pub fn sweep(&self, now: Instant) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        for peer in self.registry.snapshot() {
            let (silent_for, role, missed) = {
                let mut state = peer.state();
                let silent_for = now.saturating_duration_since(state.last_seen_at);
                let mut missed = None;
                if silent_for <= self.config.ceiling && state.awaiting_pong {
                    state.missed_heartbeats += 1;
                    missed = Some(state.missed_heartbeats);
                }
                (silent_for, state.role, missed)
            };
            if let Some(missed) = missed {
                warn!(session_id = %peer.id(), missed, "heartbeat missed");
            }
            match role {
                PeerRole::Broadcaster => outcome.broadcasters += 1,
                PeerRole::Viewer => outcome.viewers += 1,
                PeerRole::Unassigned => {}
            }

            if silent_for > self.config.ceiling {
                warn!(
                    session_id = %peer.id(),
                    silent_secs = silent_for.as_secs(),
                    "peer exceeded heartbeat ceiling"
                );
                outcome.expired.push(peer);
                continue;
            }

            match peer.connection().ping() {
                Ok(()) => {
                    peer.state().awaiting_pong = true;
                    outcome.pinged += 1;
                }
                Err(SendFailure::Full) => {
                    peer.state().awaiting_pong = true;
                    outcome.backlogged += 1;
                    debug!(session_id = %peer.id(), "ping skipped, send queue full");
                }
                Err(SendFailure::Closed) => {
                    debug!(session_id = %peer.id(), "ping failed, connection closed");
                    outcome.failed.push(peer);
                }
            }
        }

        info!(
            peers = self.registry.len(),
            broadcasters = outcome.broadcasters,
            viewers = outcome.viewers,
            pinged = outcome.pinged,
            backlogged = outcome.backlogged,
            expired = outcome.expired.len(),
            failed = outcome.failed.len(),
            "liveness sweep"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::peer::AdmittedRole;
    use crate::test_support::{connection, connection_with_capacity};
    use crate::websocket::connection::Outbound;

    fn monitor(registry: &Arc<Registry>) -> LivenessMonitor {
        LivenessMonitor::new(
            registry.clone(),
            LivenessConfig {
                interval: Duration::from_secs(60),
                ceiling: Duration::from_secs(120),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn responsive_peer_survives() {
        let registry = Arc::new(Registry::new(10));
        let (conn, mut rx) = connection("peer_a");
        let peer = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
        let monitor = monitor(&registry);

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(60)).await;
            let outcome = monitor.sweep(Instant::now());
            assert!(outcome.expired.is_empty());
            assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
            peer.record_pong(Instant::now());
        }
        assert_eq!(peer.state().missed_heartbeats, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_evicted_after_ceiling() {
        let registry = Arc::new(Registry::new(10));
        let (conn, _rx) = connection("peer_a");
        let peer = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
        let monitor = monitor(&registry);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(monitor.sweep(Instant::now()).expired.is_empty());
        tokio::time::advance(Duration::from_secs(60)).await;
        let outcome = monitor.sweep(Instant::now());
        assert!(outcome.expired.is_empty());
        assert_eq!(peer.state().missed_heartbeats, 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        let outcome = monitor.sweep(Instant::now());
        assert_eq!(outcome.expired.len(), 1);
        assert_eq!(outcome.expired[0].id().as_str(), "peer_a");
    }

    #[tokio::test(start_paused = true)]
    async fn any_activity_refreshes_last_seen() {
        let registry = Arc::new(Registry::new(10));
        let (conn, _rx) = connection("peer_a");
        let peer = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
        let monitor = monitor(&registry);

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(60)).await;
            peer.touch(Instant::now());
            assert!(monitor.sweep(Instant::now()).expired.is_empty());
        }
        assert!(peer.state().awaiting_pong);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_pings_are_counted_until_pong() {
        let registry = Arc::new(Registry::new(10));
        let (conn, _rx) = connection("peer_a");
        let peer = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
        let monitor = monitor(&registry);

        for expected in 0..3 {
            tokio::time::advance(Duration::from_secs(60)).await;
            peer.touch(Instant::now());
            let _ = monitor.sweep(Instant::now());
            assert_eq!(peer.state().missed_heartbeats, expected);
        }

        peer.record_pong(Instant::now());
        assert_eq!(peer.state().missed_heartbeats, 0);
        tokio::time::advance(Duration::from_secs(60)).await;
        let _ = monitor.sweep(Instant::now());
        assert_eq!(peer.state().missed_heartbeats, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_connection_fails_immediately() {
        let registry = Arc::new(Registry::new(10));
        let (conn, rx) = connection("peer_a");
        let _ = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
        drop(rx);
        let outcome = monitor(&registry).sweep(Instant::now());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.pinged, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_counts_as_backlog() {
        let registry = Arc::new(Registry::new(10));
        let (conn, _rx) = connection_with_capacity("peer_a", 1);
        assert!(conn.send(Arc::new("x".into())));
        let _ = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
        let outcome = monitor(&registry).sweep(Instant::now());
        assert_eq!(outcome.backlogged, 1);
        assert!(outcome.failed.is_empty());
    }
}
