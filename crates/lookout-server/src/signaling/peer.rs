//! Per-connection signaling state.

use std::sync::Arc;

use lookout_core::{BroadcasterIdentity, GroupId, SessionId, ViewerIdentity};
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::websocket::connection::ClientConnection;

/// Role requested in the connection parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmittedRole {
    /// `role=broadcaster`.
    Broadcaster,
    /// `role=viewer` with a verified bearer token.
    Viewer,
}

impl AdmittedRole {
    /// Query-string spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcaster => "broadcaster",
            Self::Viewer => "viewer",
        }
    }
}

/// Role assigned by a role-declaration message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PeerRole {
    /// No declaration received yet.
    #[default]
    Unassigned,
    /// Sent a `broadcaster` declaration.
    Broadcaster,
    /// Sent a `viewer` declaration.
    Viewer,
}

/// Mutable part of a peer.
#[derive(Clone, Debug)]
pub struct PeerState {
    /// Declared role.
    pub role: PeerRole,
    /// Display name (broadcasters).
    pub display_name: Option<String>,
    /// Group id (broadcasters).
    pub group_id: Option<GroupId>,
    /// Monitor being streamed (broadcasters).
    pub monitor_number: u32,
    /// Verified broadcaster identity.
    pub broadcaster: Option<BroadcasterIdentity>,
    /// Broadcaster session this viewer watches.
    pub watching: Option<SessionId>,
    /// Last inbound frame of any kind.
    pub last_seen_at: Instant,
    /// Consecutive pings that went unanswered.
    pub missed_heartbeats: u32,
    /// A ping was sent and no pong has come back yet.
    pub awaiting_pong: bool,
}

impl PeerState {
    fn new(now: Instant) -> Self {
        Self {
            role: PeerRole::Unassigned,
            display_name: None,
            group_id: None,
            monitor_number: 1,
            broadcaster: None,
            watching: None,
            last_seen_at: now,
            missed_heartbeats: 0,
            awaiting_pong: false,
        }
    }
}

/// A registered connection.
pub struct Peer {
    connection: Arc<ClientConnection>,
    admitted_as: AdmittedRole,
    viewer: Option<ViewerIdentity>,
    state: Mutex<PeerState>,
}

impl Peer {
    /// Wrap a freshly admitted connection.
    pub fn new(
        connection: Arc<ClientConnection>,
        admitted_as: AdmittedRole,
        viewer: Option<ViewerIdentity>,
    ) -> Self {
        Self {
            connection,
            admitted_as,
            viewer,
            state: Mutex::new(PeerState::new(Instant::now())),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        self.connection.id()
    }

    /// Outbound side of the connection.
    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Role the connection was admitted with.
    pub fn admitted_as(&self) -> AdmittedRole {
        self.admitted_as
    }

    /// Verified viewer identity, if admitted as a viewer.
    pub fn viewer(&self) -> Option<&ViewerIdentity> {
        self.viewer.as_ref()
    }

    /// Lock the mutable state. Never hold the guard across an await.
    pub fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock()
    }

    /// Declared role.
    pub fn role(&self) -> PeerRole {
        self.state.lock().role
    }

    /// Current watch target.
    pub fn watching(&self) -> Option<SessionId> {
        self.state.lock().watching.clone()
    }

    /// Whether this peer currently watches `target`.
    pub fn is_watching(&self, target: &SessionId) -> bool {
        self.state.lock().watching.as_ref() == Some(target)
    }

    /// Point the watch link at `target`, returning the previous target.
    pub fn watch(&self, target: SessionId) -> Option<SessionId> {
        self.state.lock().watching.replace(target)
    }

    /// Clear the watch link only if it still points at `target`.
    pub fn unwatch_if(&self, target: &SessionId) -> bool {
        let mut state = self.state.lock();
        if state.watching.as_ref() == Some(target) {
            state.watching = None;
            true
        } else {
            false
        }
    }

    /// Record inbound activity.
    pub fn touch(&self, now: Instant) {
        self.state.lock().last_seen_at = now;
    }

    /// Record a pong.
    pub fn record_pong(&self, now: Instant) {
        let mut state = self.state.lock();
        state.last_seen_at = now;
        state.missed_heartbeats = 0;
        state.awaiting_pong = false;
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", self.id())
            .field("admitted_as", &self.admitted_as)
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}
