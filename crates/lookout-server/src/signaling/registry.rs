//! Live connection registry.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lookout_core::{SessionId, ViewerIdentity};
use tracing::debug;

use crate::error::RegistryError;
use crate::websocket::connection::ClientConnection;

use super::peer::{AdmittedRole, Peer, PeerRole};

/// Every live peer, keyed by session id.
///
/// Lookups and iteration never hold a shard lock while caller code runs:
/// iteration helpers collect `Arc<Peer>` handles first.
pub struct Registry {
    peers: DashMap<SessionId, Arc<Peer>>,
    capacity: usize,
}

impl Registry {
    /// Create a registry holding at most `capacity` peers.
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: DashMap::new(),
            capacity,
        }
    }

    /// Register an admitted connection as an unassigned peer.
    pub fn register(
        &self,
        connection: Arc<ClientConnection>,
        admitted_as: AdmittedRole,
        viewer: Option<ViewerIdentity>,
    ) -> Result<Arc<Peer>, RegistryError> {
        if self.peers.len() >= self.capacity {
            return Err(RegistryError::Full(self.capacity));
        }
        let id = connection.id().clone();
        match self.peers.entry(id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(id)),
            Entry::Vacant(slot) => {
                let peer = Arc::new(Peer::new(connection, admitted_as, viewer));
                let _ = slot.insert(peer.clone());
                debug!(session_id = %id, role = admitted_as.as_str(), "peer registered");
                Ok(peer)
            }
        }
    }

    /// Look up a peer.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|p| p.value().clone())
    }

    /// Remove a peer. Only the first call for a session returns it.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Peer>> {
        self.peers.remove(id).map(|(_, peer)| peer)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.peers.contains_key(id)
    }

    /// Peers matching `pred`.
    pub fn peers_where(&self, pred: impl Fn(&Peer) -> bool) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All peers.
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers_where(|_| true)
    }

    /// Run `action` on each peer matching `pred`.
    pub fn for_each(&self, pred: impl Fn(&Peer) -> bool, mut action: impl FnMut(&Arc<Peer>)) {
        for peer in self.peers_where(pred) {
            action(&peer);
        }
    }

    /// Viewers whose watch link points at `broadcaster`.
    pub fn watchers_of(&self, broadcaster: &SessionId) -> Vec<Arc<Peer>> {
        self.peers_where(|p| p.role() == PeerRole::Viewer && p.is_watching(broadcaster))
    }

    /// Peers that declared the viewer role.
    pub fn viewers(&self) -> Vec<Arc<Peer>> {
        self.peers_where(|p| p.role() == PeerRole::Viewer)
    }

    /// Number of peers with the given role.
    pub fn count_role(&self, role: PeerRole) -> usize {
        self.peers.iter().filter(|e| e.value().role() == role).count()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::connection;

    #[test]
    fn register_get_remove() {
        let registry = Registry::new(10);
        let (conn, _rx) = connection("peer_a");
        let peer = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(peer.id()).unwrap(), &peer));

        assert!(registry.remove(peer.id()).is_some());
        assert!(registry.remove(peer.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_session_rejected() {
        let registry = Registry::new(10);
        let (a, _ra) = connection("peer_same");
        let (b, _rb) = connection("peer_same");
        let _ = registry.register(a, AdmittedRole::Viewer, None).unwrap();
        let err = registry.register(b, AdmittedRole::Viewer, None).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate(SessionId::from_raw("peer_same")));
    }

    #[test]
    fn capacity_enforced() {
        let registry = Registry::new(1);
        let (a, _ra) = connection("peer_a");
        let (b, _rb) = connection("peer_b");
        let _ = registry.register(a, AdmittedRole::Viewer, None).unwrap();
        assert_eq!(
            registry.register(b, AdmittedRole::Viewer, None).unwrap_err(),
            RegistryError::Full(1)
        );
    }

    #[test]
    fn filters_by_role_and_watch_link() {
        let registry = Registry::new(10);
        let (b, _rb) = connection("peer_b");
        let (v1, _r1) = connection("peer_v1");
        let (v2, _r2) = connection("peer_v2");
        let bc = registry.register(b, AdmittedRole::Broadcaster, None).unwrap();
        bc.state().role = PeerRole::Broadcaster;
        for conn in [v1, v2] {
            let v = registry.register(conn, AdmittedRole::Viewer, None).unwrap();
            v.state().role = PeerRole::Viewer;
        }
        let _ = registry
            .get(&SessionId::from_raw("peer_v1"))
            .unwrap()
            .watch(bc.id().clone());

        assert_eq!(registry.count_role(PeerRole::Viewer), 2);
        assert_eq!(registry.count_role(PeerRole::Broadcaster), 1);
        let watchers = registry.watchers_of(bc.id());
        assert_eq!(watchers.len(), 1);
        assert_eq!(watchers[0].id().as_str(), "peer_v1");

        let mut seen = 0;
        registry.for_each(|p| p.role() == PeerRole::Viewer, |_| seen += 1);
        assert_eq!(seen, 2);
    }
}
