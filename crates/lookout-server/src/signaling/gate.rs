//! Permission gate in front of the authorization collaborator.
//!
//! Every call is bounded by a timeout and fails closed: a collaborator
//! error, a timeout or a missing identity all mean "not allowed".

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lookout_core::{BroadcasterId, BroadcasterIdentity, ViewerIdentity};
use metrics::counter;
use tracing::{debug, warn};

use crate::error::CollaboratorError;
use crate::metrics::AUTHZ_DECISIONS_TOTAL;

use super::directory::DirectoryEntry;

/// Identity and permission lookups.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Resolve a viewer bearer token. `Ok(None)` means the token is invalid.
    async fn authenticate_viewer(
        &self,
        token: &str,
    ) -> Result<Option<ViewerIdentity>, CollaboratorError>;

    /// Resolve a broadcaster or installation token. `Ok(None)` means the
    /// token is invalid, expired or belongs to an inactive broadcaster.
    async fn authenticate_broadcaster(
        &self,
        token: &str,
    ) -> Result<Option<BroadcasterIdentity>, CollaboratorError>;

    /// Whether `viewer` may watch `broadcaster`.
    async fn may_view(
        &self,
        viewer: &ViewerIdentity,
        broadcaster: &BroadcasterId,
    ) -> Result<bool, CollaboratorError>;

    /// Every durable broadcaster `viewer` may see.
    async fn visible_broadcasters(
        &self,
        viewer: &ViewerIdentity,
    ) -> Result<HashSet<BroadcasterId>, CollaboratorError>;
}

/// Outcome of a credential check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict<T> {
    /// Credential accepted.
    Accepted(T),
    /// Credential rejected.
    Rejected,
    /// The collaborator failed or timed out.
    Unavailable,
}

/// Timeout-bounded, fail-closed wrapper around an [`Authorizer`].
pub struct PermissionGate {
    authorizer: Arc<dyn Authorizer>,
    timeout: Duration,
}

impl PermissionGate {
    /// Wrap `authorizer`, bounding each call by `timeout`.
    pub fn new(authorizer: Arc<dyn Authorizer>, timeout: Duration) -> Self {
        Self {
            authorizer,
            timeout,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }

    fn verdict<T>(&self, what: &'static str, result: Result<Option<T>, CollaboratorError>) -> Verdict<T> {
        match result {
            Ok(Some(value)) => {
                counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => "accepted").increment(1);
                Verdict::Accepted(value)
            }
            Ok(None) => {
                counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => "rejected").increment(1);
                debug!(check = what, "credential rejected");
                Verdict::Rejected
            }
            Err(e) => {
                counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => "unavailable").increment(1);
                warn!(check = what, error = %e, "authorization collaborator failed");
                Verdict::Unavailable
            }
        }
    }

    /// Verify a viewer bearer token.
    pub async fn authenticate_viewer(&self, token: &str) -> Verdict<ViewerIdentity> {
        let result = self.bounded(self.authorizer.authenticate_viewer(token)).await;
        self.verdict("viewer_token", result)
    }

    /// Verify a broadcaster credential.
    pub async fn authenticate_broadcaster(&self, token: &str) -> Verdict<BroadcasterIdentity> {
        let result = self
            .bounded(self.authorizer.authenticate_broadcaster(token))
            .await;
        self.verdict("broadcaster_token", result)
    }

    /// Whether `viewer` may watch the broadcaster with durable id
    /// `broadcaster`.
    ///
    /// A viewer without identity, or a broadcaster without a durable id,
    /// is always denied.
    pub async fn may_watch(
        &self,
        viewer: Option<&ViewerIdentity>,
        broadcaster: Option<&BroadcasterId>,
    ) -> bool {
        let (Some(viewer), Some(broadcaster)) = (viewer, broadcaster) else {
            counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => "denied").increment(1);
            return false;
        };
        match self
            .bounded(self.authorizer.may_view(viewer, broadcaster))
            .await
        {
            Ok(allowed) => {
                let outcome = if allowed { "allowed" } else { "denied" };
                counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
                allowed
            }
            Err(e) => {
                counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => "unavailable").increment(1);
                warn!(
                    user_id = %viewer.user_id,
                    broadcaster_id = %broadcaster,
                    error = %e,
                    "permission check failed, denying"
                );
                false
            }
        }
    }

    /// Keep only the entries `viewer` may see, in their original order.
    ///
    /// Uses a single collaborator call per invocation.
    pub async fn filter_visible(
        &self,
        viewer: Option<&ViewerIdentity>,
        entries: Vec<Arc<DirectoryEntry>>,
    ) -> Vec<Arc<DirectoryEntry>> {
        let Some(viewer) = viewer else {
            return Vec::new();
        };
        if entries.is_empty() {
            return entries;
        }
        match self
            .bounded(self.authorizer.visible_broadcasters(viewer))
            .await
        {
            Ok(visible) => entries
                .into_iter()
                .filter(|e| e.directory_id.as_ref().is_some_and(|id| visible.contains(id)))
                .collect(),
            Err(e) => {
                warn!(user_id = %viewer.user_id, error = %e, "visibility lookup failed, hiding all");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::directory::{BroadcasterInfo, Directory};
    use crate::signaling::peer::AdmittedRole;
    use crate::signaling::registry::Registry;
    use crate::test_support::{StaticAuthorizer, broadcaster_identity, connection, viewer};
    use lookout_core::{GroupId, SessionId};

    fn gate(auth: &Arc<StaticAuthorizer>) -> PermissionGate {
        PermissionGate::new(auth.clone(), Duration::from_millis(200))
    }

    fn published(entries: &[(&str, Option<&str>)]) -> Vec<Arc<DirectoryEntry>> {
        let registry = Arc::new(Registry::new(10));
        let directory = Directory::new(registry.clone(), false);
        for (session, durable) in entries {
            let (conn, _rx) = connection(session);
            let _ = registry.register(conn, AdmittedRole::Broadcaster, None).unwrap();
            let _ = directory
                .publish(
                    &SessionId::from_raw(*session),
                    BroadcasterInfo {
                        display_name: (*session).into(),
                        group_id: GroupId::from_raw("-1"),
                        monitor_number: 1,
                        identity: durable.map(broadcaster_identity),
                    },
                )
                .unwrap();
        }
        directory.list(|_| true)
    }

    #[tokio::test]
    async fn may_watch_follows_grants() {
        let auth = Arc::new(StaticAuthorizer::default());
        auth.grant("u1", "bc_1");
        let gate = gate(&auth);
        let v = viewer("u1");
        assert!(gate.may_watch(Some(&v), Some(&BroadcasterId::from_raw("bc_1"))).await);
        assert!(!gate.may_watch(Some(&v), Some(&BroadcasterId::from_raw("bc_2"))).await);
        assert!(!gate.may_watch(None, Some(&BroadcasterId::from_raw("bc_1"))).await);
        assert!(!gate.may_watch(Some(&v), None).await);
    }

    #[tokio::test]
    async fn failures_deny() {
        let auth = Arc::new(StaticAuthorizer::default());
        auth.grant("u1", "bc_1");
        *auth.fail.lock() = true;
        let gate = gate(&auth);
        assert!(
            !gate
                .may_watch(Some(&viewer("u1")), Some(&BroadcasterId::from_raw("bc_1")))
                .await
        );
        assert_eq!(gate.authenticate_broadcaster("t").await, Verdict::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_denies() {
        let auth = Arc::new(StaticAuthorizer::default());
        auth.grant("u1", "bc_1");
        *auth.delay.lock() = Some(Duration::from_secs(10));
        let gate = gate(&auth);
        assert!(
            !gate
                .may_watch(Some(&viewer("u1")), Some(&BroadcasterId::from_raw("bc_1")))
                .await
        );
        let entries = published(&[("peer_a", Some("bc_1"))]);
        assert!(gate.filter_visible(Some(&viewer("u1")), entries).await.is_empty());
    }

    #[tokio::test]
    async fn filter_keeps_only_granted_durable_entries() {
        let auth = Arc::new(StaticAuthorizer::default());
        auth.grant("u1", "bc_1");
        let gate = gate(&auth);
        let entries = published(&[
            ("peer_a", Some("bc_1")),
            ("peer_b", Some("bc_2")),
            ("peer_c", None),
        ]);
        let visible = gate.filter_visible(Some(&viewer("u1")), entries.clone()).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].session_id.as_str(), "peer_a");

        assert!(gate.filter_visible(None, entries).await.is_empty());
    }

    #[tokio::test]
    async fn broadcaster_credentials() {
        let auth = Arc::new(StaticAuthorizer::default());
        auth.add_token("good", broadcaster_identity("bc_1"));
        let gate = gate(&auth);
        assert!(matches!(
            gate.authenticate_broadcaster("good").await,
            Verdict::Accepted(id) if id.broadcaster_id.as_str() == "bc_1"
        ));
        assert_eq!(gate.authenticate_broadcaster("bad").await, Verdict::Rejected);
    }

    #[tokio::test]
    async fn viewer_credentials() {
        let auth = Arc::new(StaticAuthorizer::default());
        auth.add_viewer_token("vt", viewer("u9"));
        let gate = gate(&auth);
        assert!(matches!(
            gate.authenticate_viewer("vt").await,
            Verdict::Accepted(v) if v.user_id.as_str() == "u9"
        ));
        assert_eq!(gate.authenticate_viewer("nope").await, Verdict::Rejected);
    }
}
