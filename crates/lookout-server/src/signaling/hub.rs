//! The signaling hub: owns the registry and directory and routes every
//! inbound message.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use lookout_core::{
    BroadcasterHello, BroadcasterIdentity, CloseReason, InboundMessage, OutboundMessage,
    ProtocolError, SessionId, ViewerIdentity, WatchRequest,
};
use metrics::counter;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::{DirectoryError, RegistryError};
use crate::metrics::{LIVENESS_REAPED_TOTAL, WS_INVALID_MESSAGES_TOTAL};
use crate::websocket::connection::ClientConnection;

use super::directory::{BroadcasterInfo, Directory, DirectoryEntry, PublishOutcome};
use super::fanout::{TelemetryFanout, TelemetrySink};
use super::gate::{Authorizer, PermissionGate, Verdict};
use super::liveness::{LivenessConfig, LivenessMonitor, SweepOutcome};
use super::peer::{AdmittedRole, Peer, PeerRole};
use super::registry::Registry;
use super::relay::NegotiationRelay;

/// Error sent to a viewer whose watch request was denied.
pub const WATCH_DENIED: &str = "not authorized to watch this broadcaster";

/// Hub tuning.
#[derive(Clone, Copy, Debug)]
pub struct HubConfig {
    /// Registry capacity.
    pub max_connections: usize,
    /// Reject broadcasters without a credential.
    pub require_broadcaster_token: bool,
    /// Bound on each authorization call.
    pub authorizer_timeout: Duration,
    /// Heartbeat timing.
    pub liveness: LivenessConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for HubConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            require_broadcaster_token: config.require_broadcaster_token,
            authorizer_timeout: config.authorizer_timeout(),
            liveness: LivenessConfig {
                interval: config.heartbeat_interval(),
                ceiling: config.heartbeat_ceiling(),
            },
        }
    }
}

/// Routes messages between broadcasters and viewers.
pub struct SignalingHub {
    registry: Arc<Registry>,
    directory: Arc<Directory>,
    gate: Arc<PermissionGate>,
    relay: NegotiationRelay,
    fanout: TelemetryFanout,
    liveness: LivenessMonitor,
    require_broadcaster_token: bool,
}

impl SignalingHub {
    /// Build a hub around the given collaborators.
    pub fn new(
        config: HubConfig,
        authorizer: Arc<dyn Authorizer>,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        let registry = Arc::new(Registry::new(config.max_connections));
        let directory = Arc::new(Directory::new(
            registry.clone(),
            config.require_broadcaster_token,
        ));
        let gate = Arc::new(PermissionGate::new(authorizer, config.authorizer_timeout));
        Self {
            relay: NegotiationRelay::new(registry.clone()),
            fanout: TelemetryFanout::new(registry.clone(), directory.clone(), gate.clone(), sink),
            liveness: LivenessMonitor::new(registry.clone(), config.liveness),
            registry,
            directory,
            gate,
            require_broadcaster_token: config.require_broadcaster_token,
        }
    }

    /// Live peers.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Published broadcasters.
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    // ── Admission ──

    /// Check connection parameters before registration.
    pub async fn admit(
        &self,
        role: Option<&str>,
        token: Option<&str>,
    ) -> Result<(AdmittedRole, Option<ViewerIdentity>), CloseReason> {
        match role {
            Some("broadcaster") => Ok((AdmittedRole::Broadcaster, None)),
            Some("viewer") => {
                let token = token
                    .filter(|t| !t.is_empty())
                    .ok_or(CloseReason::MissingToken)?;
                match self.gate.authenticate_viewer(token).await {
                    Verdict::Accepted(identity) => Ok((AdmittedRole::Viewer, Some(identity))),
                    Verdict::Rejected | Verdict::Unavailable => Err(CloseReason::InvalidToken),
                }
            }
            _ => Err(CloseReason::MissingRole),
        }
    }

    /// Register an admitted connection.
    pub fn connect(
        &self,
        connection: Arc<ClientConnection>,
        admitted_as: AdmittedRole,
        viewer: Option<ViewerIdentity>,
    ) -> Result<Arc<Peer>, RegistryError> {
        self.registry.register(connection, admitted_as, viewer)
    }

    // ── Inbound traffic ──

    /// Record inbound activity of any kind.
    pub fn touch(&self, session: &SessionId) {
        if let Some(peer) = self.registry.get(session) {
            peer.touch(Instant::now());
        }
    }

    /// Record a pong.
    pub fn handle_pong(&self, session: &SessionId) {
        if let Some(peer) = self.registry.get(session) {
            peer.record_pong(Instant::now());
        }
    }

    /// Decode and route one text frame.
    pub async fn handle_text(&self, session: &SessionId, text: &str) {
        let Some(peer) = self.registry.get(session) else {
            return;
        };
        peer.touch(Instant::now());
        match InboundMessage::parse(text) {
            Ok(message) => self.dispatch(&peer, message).await,
            Err(e) => {
                let reason = match e {
                    ProtocolError::Malformed(_) => "malformed",
                    ProtocolError::UnknownType(_) => "unknown_type",
                    ProtocolError::InvalidFields { .. } => "invalid_fields",
                };
                counter!(WS_INVALID_MESSAGES_TOTAL, "reason" => reason).increment(1);
                warn!(session_id = %session, error = %e, "dropping inbound message");
            }
        }
    }

    /// Route a decoded message from `peer`.
    #[instrument(skip_all, fields(session_id = %peer.id(), kind = message.type_name()))]
    pub async fn dispatch(&self, peer: &Arc<Peer>, message: InboundMessage) {
        match message {
            InboundMessage::Broadcaster(hello) => self.register_broadcaster(peer, hello).await,
            InboundMessage::Viewer => self.register_viewer(peer).await,
            InboundMessage::Watch(request) => self.watch(peer, request).await,
            InboundMessage::Negotiation {
                kind,
                target_id,
                payload,
            } => {
                let _ = self.relay.relay(peer.id(), &target_id, kind, &payload);
            }
            InboundMessage::Monitoring(report) => {
                if peer.role() != PeerRole::Broadcaster {
                    warn!("telemetry from a non-broadcaster dropped");
                    return;
                }
                let _ = self.fanout.publish(peer.id(), *report).await;
            }
        }
    }

    async fn register_broadcaster(&self, peer: &Arc<Peer>, hello: BroadcasterHello) {
        if peer.admitted_as() != AdmittedRole::Broadcaster {
            warn!("broadcaster declaration from a viewer connection dropped");
            return;
        }

        let token = hello.broadcaster_token.as_deref().filter(|t| !t.is_empty());
        let identity = match token {
            Some(token) => match self.gate.authenticate_broadcaster(token).await {
                Verdict::Accepted(identity) => Some(identity),
                Verdict::Rejected | Verdict::Unavailable => {
                    self.reject_broadcaster(peer).await;
                    return;
                }
            },
            None if self.require_broadcaster_token => {
                self.reject_broadcaster(peer).await;
                return;
            }
            None => None,
        };

        let auth_success = identity.as_ref().map(auth_success);
        let info = BroadcasterInfo {
            display_name: display_name(peer.id(), &hello, identity.as_ref()),
            group_id: hello.group(),
            monitor_number: hello.monitor(),
            identity,
        };
        let outcome = match self.directory.publish(peer.id(), info) {
            Ok(outcome) => outcome,
            Err(DirectoryError::NotRegistered(_)) => return,
            Err(e @ DirectoryError::Unauthenticated(_)) => {
                warn!(error = %e, "publish refused");
                self.reject_broadcaster(peer).await;
                return;
            }
        };
        self.finish_publish(peer, outcome, auth_success).await;
    }

    async fn finish_publish(
        &self,
        peer: &Arc<Peer>,
        outcome: PublishOutcome,
        auth_success: Option<OutboundMessage>,
    ) {
        // Disconnected while publishing: the cascade may have missed us.
        if !self.registry.contains(peer.id()) {
            let _ = self.directory.unpublish(peer.id());
            if let Some(replaced) = outcome.replaced {
                self.retire_superseded(&replaced).await;
            }
            return;
        }

        info!(
            name = %outcome.entry.display_name,
            monitor = outcome.entry.monitor_number,
            company_id = %outcome.entry.group_id,
            authenticated = outcome.entry.directory_id.is_some(),
            "broadcaster registered"
        );
        if let Some(message) = auth_success {
            let _ = peer.connection().send_message(&message);
        }
        if let Some(replaced) = outcome.replaced {
            self.retire_superseded(&replaced).await;
        }
        if !outcome.republished || outcome.changed {
            self.announce_arrival(&outcome.entry).await;
        }
    }

    /// Close a session evicted by a newer one for the same installation
    /// and tell its audience it left.
    async fn retire_superseded(&self, replaced: &DirectoryEntry) {
        replaced.connection.close(CloseReason::Superseded);
        let watchers = self.unlink_watchers(&replaced.session_id);
        self.announce_departure(replaced, &watchers).await;
    }

    async fn reject_broadcaster(&self, peer: &Arc<Peer>) {
        warn!("broadcaster authentication failed");
        peer.connection().close(CloseReason::BroadcasterAuthFailed);
        let _ = self.disconnect(peer.id()).await;
    }

    async fn register_viewer(&self, peer: &Arc<Peer>) {
        if peer.admitted_as() != AdmittedRole::Viewer {
            warn!("viewer declaration from a broadcaster connection dropped");
            return;
        }
        peer.state().role = PeerRole::Viewer;
        let visible = self
            .gate
            .filter_visible(peer.viewer(), self.directory.list(|_| true))
            .await;
        debug!(visible = visible.len(), "sending broadcaster list");
        let _ = peer.connection().send_message(&OutboundMessage::BroadcasterList {
            broadcasters: visible.iter().map(|e| e.summary()).collect(),
        });
    }

    async fn watch(&self, peer: &Arc<Peer>, request: WatchRequest) {
        if peer.admitted_as() != AdmittedRole::Viewer {
            warn!("watch from a broadcaster connection dropped");
            return;
        }
        let target = request.target_id;
        let Some(entry) = self.directory.get(&target) else {
            debug!(target = %target, "watch target not published");
            return;
        };
        if !self
            .gate
            .may_watch(peer.viewer(), entry.directory_id.as_ref())
            .await
        {
            info!(target = %target, "watch denied");
            let _ = peer
                .connection()
                .send_message(&OutboundMessage::error(WATCH_DENIED));
            return;
        }
        if self.directory.get(&target).is_none() || !self.registry.contains(peer.id()) {
            return;
        }

        let previous = {
            let mut state = peer.state();
            if state.role == PeerRole::Unassigned {
                state.role = PeerRole::Viewer;
            }
            state.watching.replace(target.clone())
        };
        if !self.registry.contains(peer.id()) {
            let _ = peer.unwatch_if(&target);
            return;
        }
        if let Some(old) = previous.filter(|old| old != &target) {
            if let Some(old_broadcaster) = self.registry.get(&old) {
                let _ = old_broadcaster
                    .connection()
                    .send_message(&OutboundMessage::ViewerDisconnected {
                        viewer_id: peer.id().clone(),
                    });
            }
        }

        let monitor_number = request.monitor_number.unwrap_or(1);
        info!(target = %target, monitor = monitor_number, "viewer watching");
        let _ = entry.connection.send_message(&OutboundMessage::NewViewer {
            viewer_id: peer.id().clone(),
            monitor_number,
        });
        let _ = peer.connection().send_message(&OutboundMessage::ViewerJoined {
            broadcaster_id: target,
            broadcaster_name: entry.display_name.clone(),
            monitor_number,
        });
    }

    // ── Announcements ──

    async fn announce_arrival(&self, entry: &DirectoryEntry) {
        let message = OutboundMessage::NewBroadcaster {
            broadcaster_id: entry.session_id.clone(),
            broadcaster_name: entry.display_name.clone(),
            monitor_number: entry.monitor_number,
            company_id: entry.group_id.clone(),
        };
        let audience = self.permitted_viewers(entry, &HashSet::new()).await;
        for viewer in audience {
            let _ = viewer.connection().send_message(&message);
        }
    }

    /// Tell former watchers and every permitted viewer that `entry` left.
    async fn announce_departure(&self, entry: &DirectoryEntry, watchers: &[Arc<Peer>]) {
        let message = OutboundMessage::BroadcasterLeft {
            broadcaster_id: entry.session_id.clone(),
        };
        let watcher_ids: HashSet<SessionId> = watchers.iter().map(|w| w.id().clone()).collect();
        for watcher in watchers {
            if self.registry.contains(watcher.id()) {
                let _ = watcher.connection().send_message(&message);
            }
        }
        for viewer in self.permitted_viewers(entry, &watcher_ids).await {
            let _ = viewer.connection().send_message(&message);
        }
    }

    async fn permitted_viewers(
        &self,
        entry: &DirectoryEntry,
        skip: &HashSet<SessionId>,
    ) -> Vec<Arc<Peer>> {
        let viewers = self
            .registry
            .peers_where(|p| p.role() == PeerRole::Viewer && !skip.contains(p.id()));
        let directory_id = entry.directory_id.as_ref();
        let checks = join_all(viewers.into_iter().map(|viewer| async move {
            let allowed = self.gate.may_watch(viewer.viewer(), directory_id).await;
            (viewer, allowed)
        }))
        .await;
        checks
            .into_iter()
            .filter_map(|(viewer, allowed)| allowed.then_some(viewer))
            .collect()
    }

    fn unlink_watchers(&self, broadcaster: &SessionId) -> Vec<Arc<Peer>> {
        self.registry
            .watchers_of(broadcaster)
            .into_iter()
            .filter(|w| w.unwatch_if(broadcaster))
            .collect()
    }

    // ── Teardown ──

    /// Remove `session` and run its cascade. Returns `false` if the
    /// session was already gone, so the cascade runs exactly once.
    pub async fn disconnect(&self, session: &SessionId) -> bool {
        let Some(peer) = self.registry.remove(session) else {
            return false;
        };
        let (role, watching) = {
            let state = peer.state();
            (state.role, state.watching.clone())
        };
        match role {
            PeerRole::Broadcaster => {
                let watchers = self.unlink_watchers(session);
                if let Some(entry) = self.directory.unpublish(session) {
                    self.announce_departure(&entry, &watchers).await;
                }
            }
            PeerRole::Viewer => {
                if let Some(broadcaster) = watching.and_then(|b| self.registry.get(&b)) {
                    let _ = broadcaster
                        .connection()
                        .send_message(&OutboundMessage::ViewerDisconnected {
                            viewer_id: session.clone(),
                        });
                }
            }
            PeerRole::Unassigned => {}
        }
        info!(session_id = %session, role = ?role, "peer disconnected");
        true
    }

    /// Run one liveness sweep and evict what it found.
    pub async fn sweep_liveness(&self, now: Instant) -> SweepOutcome {
        let outcome = self.liveness.sweep(now);
        for peer in &outcome.expired {
            counter!(LIVENESS_REAPED_TOTAL, "reason" => "timeout").increment(1);
            peer.connection().close(CloseReason::HeartbeatTimeout);
            let _ = self.disconnect(peer.id()).await;
        }
        for peer in &outcome.failed {
            counter!(LIVENESS_REAPED_TOTAL, "reason" => "closed").increment(1);
            peer.connection().token().cancel();
            let _ = self.disconnect(peer.id()).await;
        }
        outcome
    }

    /// Sweep every liveness interval until `cancel` fires.
    pub async fn run_liveness(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.liveness.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("liveness monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let _ = self.sweep_liveness(Instant::now()).await;
                }
            }
        }
    }

    /// Close every connection with `reason`.
    pub fn close_all(&self, reason: CloseReason) {
        for peer in self.registry.snapshot() {
            peer.connection().close(reason);
        }
    }
}

fn auth_success(identity: &BroadcasterIdentity) -> OutboundMessage {
    OutboundMessage::AuthSuccess {
        broadcaster_id: identity.broadcaster_id.to_string(),
        token: identity.issued_token.as_ref().map(|t| t.token.clone()),
        token_expires_at: identity.issued_token.as_ref().map(|t| t.expires_at),
    }
}

fn display_name(
    session: &SessionId,
    hello: &BroadcasterHello,
    identity: Option<&BroadcasterIdentity>,
) -> String {
    hello
        .broadcaster_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| identity.map(|i| i.name.clone()))
        .unwrap_or_else(|| {
            let raw = session.as_str();
            let tail = raw.char_indices().rev().nth(5).map_or(raw, |(i, _)| &raw[i..]);
            format!("Broadcaster {tail}")
        })
}
