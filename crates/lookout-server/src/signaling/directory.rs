//! Directory of published broadcasters.

use std::sync::Arc;

use dashmap::DashMap;
use lookout_core::{
    BroadcasterId, BroadcasterIdentity, BroadcasterSummary, GroupId, InstallationId, SessionId,
    UserId,
};
use metrics::gauge;
use tracing::{debug, info};

use crate::error::DirectoryError;
use crate::metrics::DIRECTORY_BROADCASTERS;
use crate::websocket::connection::ClientConnection;

use super::peer::PeerRole;
use super::registry::Registry;

/// What a broadcaster declared about itself.
#[derive(Clone, Debug)]
pub struct BroadcasterInfo {
    /// Display name.
    pub display_name: String,
    /// Group id.
    pub group_id: GroupId,
    /// Monitor being streamed.
    pub monitor_number: u32,
    /// Identity verified from the broadcaster's credential.
    pub identity: Option<BroadcasterIdentity>,
}

/// A published broadcaster.
#[derive(Clone)]
pub struct DirectoryEntry {
    /// Broadcaster session.
    pub session_id: SessionId,
    /// Outbound side of the broadcaster connection.
    pub connection: Arc<ClientConnection>,
    /// Display name.
    pub display_name: String,
    /// Group id.
    pub group_id: GroupId,
    /// Monitor being streamed.
    pub monitor_number: u32,
    /// Durable broadcaster id, when authenticated.
    pub directory_id: Option<BroadcasterId>,
    /// `directory_id#monitor`, when authenticated.
    pub installation_id: Option<InstallationId>,
    /// Owner of the durable broadcaster.
    pub owner_id: Option<UserId>,
}

impl DirectoryEntry {
    /// Row for a `broadcaster-list` snapshot.
    pub fn summary(&self) -> BroadcasterSummary {
        BroadcasterSummary {
            id: self.session_id.clone(),
            name: self.display_name.clone(),
            monitor_number: self.monitor_number,
            company_id: self.group_id.clone(),
        }
    }
}

impl std::fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("session_id", &self.session_id)
            .field("display_name", &self.display_name)
            .field("monitor_number", &self.monitor_number)
            .field("installation_id", &self.installation_id)
            .finish_non_exhaustive()
    }
}

/// Result of [`Directory::publish`].
#[derive(Debug)]
pub struct PublishOutcome {
    /// The entry now in the directory.
    pub entry: Arc<DirectoryEntry>,
    /// Entry for another session evicted because it held the same
    /// installation.
    pub replaced: Option<Arc<DirectoryEntry>>,
    /// The session was already published.
    pub republished: bool,
    /// Republished with a different name, group or monitor.
    pub changed: bool,
}

/// Published broadcasters plus an installation index.
///
/// Each installation maps to at most one session. Publishing a second
/// session for the same installation evicts the first.
pub struct Directory {
    registry: Arc<Registry>,
    entries: DashMap<SessionId, Arc<DirectoryEntry>>,
    installations: DashMap<InstallationId, SessionId>,
    require_identity: bool,
}

impl Directory {
    /// Create a directory over `registry`.
    pub fn new(registry: Arc<Registry>, require_identity: bool) -> Self {
        Self {
            registry,
            entries: DashMap::new(),
            installations: DashMap::new(),
            require_identity,
        }
    }

    /// Publish `session` as a broadcaster.
    pub fn publish(
        &self,
        session: &SessionId,
        info: BroadcasterInfo,
    ) -> Result<PublishOutcome, DirectoryError> {
        let peer = self
            .registry
            .get(session)
            .ok_or_else(|| DirectoryError::NotRegistered(session.clone()))?;
        if self.require_identity && info.identity.is_none() {
            return Err(DirectoryError::Unauthenticated(session.clone()));
        }

        let directory_id = info.identity.as_ref().map(|i| i.broadcaster_id.clone());
        let installation_id = directory_id
            .as_ref()
            .map(|id| InstallationId::for_monitor(id, info.monitor_number));
        let entry = Arc::new(DirectoryEntry {
            session_id: session.clone(),
            connection: peer.connection().clone(),
            display_name: info.display_name.clone(),
            group_id: info.group_id.clone(),
            monitor_number: info.monitor_number,
            directory_id,
            installation_id: installation_id.clone(),
            owner_id: info.identity.as_ref().map(|i| i.owner_id.clone()),
        });

        {
            let mut state = peer.state();
            state.role = PeerRole::Broadcaster;
            state.display_name = Some(info.display_name);
            state.group_id = Some(info.group_id);
            state.monitor_number = info.monitor_number;
            state.broadcaster = info.identity;
        }

        let previous = self.entries.insert(session.clone(), entry.clone());
        let changed = previous.as_ref().is_some_and(|p| {
            p.display_name != entry.display_name
                || p.group_id != entry.group_id
                || p.monitor_number != entry.monitor_number
        });
        if let Some(old_installation) = previous.as_ref().and_then(|p| p.installation_id.clone()) {
            if installation_id.as_ref() != Some(&old_installation) {
                let _ = self
                    .installations
                    .remove_if(&old_installation, |_, owner| owner == session);
            }
        }

        let mut replaced = None;
        if let Some(installation) = installation_id {
            if let Some(other) = self.installations.insert(installation.clone(), session.clone()) {
                if &other != session {
                    replaced = self.entries.remove(&other).map(|(_, e)| e);
                    if replaced.is_some() {
                        info!(
                            installation_id = %installation,
                            old_session = %other,
                            new_session = %session,
                            "installation reconnected, replacing previous session"
                        );
                    }
                }
            }
        }

        gauge!(DIRECTORY_BROADCASTERS).set(self.entries.len() as f64);
        debug!(session_id = %session, name = %entry.display_name, "broadcaster published");
        Ok(PublishOutcome {
            entry,
            replaced,
            republished: previous.is_some(),
            changed,
        })
    }

    /// Remove `session` from the directory.
    pub fn unpublish(&self, session: &SessionId) -> Option<Arc<DirectoryEntry>> {
        let (_, entry) = self.entries.remove(session)?;
        if let Some(installation) = &entry.installation_id {
            let _ = self
                .installations
                .remove_if(installation, |_, owner| owner == session);
        }
        gauge!(DIRECTORY_BROADCASTERS).set(self.entries.len() as f64);
        debug!(session_id = %session, "broadcaster unpublished");
        Some(entry)
    }

    /// Look up a published broadcaster.
    pub fn get(&self, session: &SessionId) -> Option<Arc<DirectoryEntry>> {
        self.entries.get(session).map(|e| e.value().clone())
    }

    /// Session currently holding `installation`.
    pub fn session_for(&self, installation: &InstallationId) -> Option<SessionId> {
        self.installations.get(installation).map(|s| s.value().clone())
    }

    /// Entries matching `filter`, ordered by case-insensitive display name
    /// then session id.
    pub fn list(&self, filter: impl Fn(&DirectoryEntry) -> bool) -> Vec<Arc<DirectoryEntry>> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.session_id.as_str().cmp(b.session_id.as_str()))
        });
        out
    }

    /// Number of published broadcasters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is published.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::peer::AdmittedRole;
    use crate::test_support::{broadcaster_identity, connection};

    fn setup(ids: &[&str]) -> (Arc<Registry>, Directory) {
        let registry = Arc::new(Registry::new(100));
        for id in ids {
            let (conn, _rx) = connection(id);
            let _ = registry
                .register(conn, AdmittedRole::Broadcaster, None)
                .unwrap();
        }
        let directory = Directory::new(registry.clone(), false);
        (registry, directory)
    }

    fn info(name: &str, identity: Option<&str>) -> BroadcasterInfo {
        BroadcasterInfo {
            display_name: name.into(),
            group_id: GroupId::from_raw("-1"),
            monitor_number: 1,
            identity: identity.map(broadcaster_identity),
        }
    }

    fn sid(s: &str) -> SessionId {
        SessionId::from_raw(s)
    }

    #[test]
    fn publish_assigns_role_and_lists() {
        let (registry, directory) = setup(&["peer_a"]);
        let outcome = directory.publish(&sid("peer_a"), info("Desk-7", None)).unwrap();
        assert!(outcome.replaced.is_none());
        assert!(!outcome.republished);
        assert_eq!(
            registry.get(&sid("peer_a")).unwrap().role(),
            PeerRole::Broadcaster
        );
        assert_eq!(directory.list(|_| true).len(), 1);
    }

    #[test]
    fn unregistered_session_rejected() {
        let (_registry, directory) = setup(&[]);
        assert_eq!(
            directory.publish(&sid("ghost"), info("x", None)).unwrap_err(),
            DirectoryError::NotRegistered(sid("ghost"))
        );
    }

    #[test]
    fn identity_required_when_configured() {
        let registry = Arc::new(Registry::new(10));
        let (conn, _rx) = connection("peer_a");
        let _ = registry.register(conn, AdmittedRole::Broadcaster, None).unwrap();
        let directory = Directory::new(registry, true);
        assert!(matches!(
            directory.publish(&sid("peer_a"), info("x", None)),
            Err(DirectoryError::Unauthenticated(_))
        ));
        assert!(directory.publish(&sid("peer_a"), info("x", Some("bc_1"))).is_ok());
    }

    #[test]
    fn same_installation_replaces_previous_session() {
        let (_registry, directory) = setup(&["peer_old", "peer_new"]);
        let _ = directory
            .publish(&sid("peer_old"), info("Desk-7", Some("bc_1")))
            .unwrap();
        let outcome = directory
            .publish(&sid("peer_new"), info("Desk-7", Some("bc_1")))
            .unwrap();
        let replaced = outcome.replaced.unwrap();
        assert_eq!(replaced.session_id, sid("peer_old"));
        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.session_for(&InstallationId::from_raw("bc_1#1")),
            Some(sid("peer_new"))
        );

        // Late unpublish of the replaced session leaves the index alone.
        assert!(directory.unpublish(&sid("peer_old")).is_none());
        assert_eq!(
            directory.session_for(&InstallationId::from_raw("bc_1#1")),
            Some(sid("peer_new"))
        );
    }

    #[test]
    fn different_monitors_coexist() {
        let (_registry, directory) = setup(&["peer_m1", "peer_m2"]);
        let _ = directory
            .publish(&sid("peer_m1"), info("Desk", Some("bc_1")))
            .unwrap();
        let mut second = info("Desk", Some("bc_1"));
        second.monitor_number = 2;
        let outcome = directory.publish(&sid("peer_m2"), second).unwrap();
        assert!(outcome.replaced.is_none());
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn identical_republish_is_unchanged() {
        let (_registry, directory) = setup(&["peer_a"]);
        let _ = directory.publish(&sid("peer_a"), info("Desk", Some("bc_1"))).unwrap();
        let same = directory.publish(&sid("peer_a"), info("Desk", Some("bc_1"))).unwrap();
        assert!(same.republished);
        assert!(!same.changed);
        let renamed = directory.publish(&sid("peer_a"), info("Front Desk", Some("bc_1"))).unwrap();
        assert!(renamed.changed);
        assert_eq!(directory.get(&sid("peer_a")).unwrap().display_name, "Front Desk");
    }

    #[test]
    fn republish_moves_installation_index() {
        let (_registry, directory) = setup(&["peer_a"]);
        let _ = directory.publish(&sid("peer_a"), info("Desk", Some("bc_1"))).unwrap();
        let mut moved = info("Desk", Some("bc_1"));
        moved.monitor_number = 3;
        let outcome = directory.publish(&sid("peer_a"), moved).unwrap();
        assert!(outcome.republished);
        assert!(outcome.changed);
        assert!(directory.session_for(&InstallationId::from_raw("bc_1#1")).is_none());
        assert_eq!(
            directory.session_for(&InstallationId::from_raw("bc_1#3")),
            Some(sid("peer_a"))
        );
    }

    #[test]
    fn publish_then_unpublish_leaves_nothing() {
        let (_registry, directory) = setup(&["peer_a"]);
        let _ = directory.publish(&sid("peer_a"), info("Desk", Some("bc_1"))).unwrap();
        assert!(directory.unpublish(&sid("peer_a")).is_some());
        assert!(directory.unpublish(&sid("peer_a")).is_none());
        assert!(directory.is_empty());
        assert!(directory.session_for(&InstallationId::from_raw("bc_1#1")).is_none());
    }

    #[test]
    fn list_sorted_case_insensitively() {
        let (_registry, directory) = setup(&["peer_1", "peer_2", "peer_3"]);
        let _ = directory.publish(&sid("peer_1"), info("zeta", None)).unwrap();
        let _ = directory.publish(&sid("peer_2"), info("Alpha", None)).unwrap();
        let _ = directory.publish(&sid("peer_3"), info("beta", None)).unwrap();
        let names: Vec<_> = directory
            .list(|_| true)
            .iter()
            .map(|e| e.display_name.clone())
            .collect();
        assert_eq!(names, ["Alpha", "beta", "zeta"]);

        let filtered = directory.list(|e| e.display_name.starts_with('b'));
        assert_eq!(filtered.len(), 1);
    }
}
