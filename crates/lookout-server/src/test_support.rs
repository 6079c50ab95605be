//! Shared helpers for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use lookout_core::{
    BroadcasterId, BroadcasterIdentity, SessionId, UserId, UserRole, ViewerIdentity,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CollaboratorError;
use crate::signaling::gate::Authorizer;
use crate::websocket::connection::{ClientConnection, Outbound};

/// A connection whose writer side is the returned receiver.
pub(crate) fn connection(id: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
    connection_with_capacity(id, 64)
}

pub(crate) fn connection_with_capacity(
    id: &str,
    capacity: usize,
) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    let conn = ClientConnection::new(SessionId::from_raw(id), tx, CancellationToken::new());
    (Arc::new(conn), rx)
}

/// Every queued text frame, decoded.
pub(crate) fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::Text(text) = item {
            out.push(serde_json::from_str(&text).unwrap());
        }
    }
    out
}

/// Queued frame types, in order.
pub(crate) fn types(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
    drain(rx)
        .into_iter()
        .map(|v| v["type"].as_str().unwrap_or_default().to_owned())
        .collect()
}

pub(crate) fn viewer(user: &str) -> ViewerIdentity {
    ViewerIdentity {
        user_id: UserId::from_raw(user),
        username: user.to_owned(),
        role: UserRole::Viewer,
    }
}

pub(crate) fn broadcaster_identity(id: &str) -> BroadcasterIdentity {
    BroadcasterIdentity {
        broadcaster_id: BroadcasterId::from_raw(id),
        name: id.to_owned(),
        owner_id: UserId::from_raw("owner"),
        issued_token: None,
    }
}

/// In-memory authorizer with mutable grants.
#[derive(Default)]
pub(crate) struct StaticAuthorizer {
    grants: Mutex<HashMap<UserId, HashSet<BroadcasterId>>>,
    tokens: Mutex<HashMap<String, BroadcasterIdentity>>,
    viewer_tokens: Mutex<HashMap<String, ViewerIdentity>>,
    pub(crate) fail: Mutex<bool>,
    pub(crate) delay: Mutex<Option<std::time::Duration>>,
}

impl StaticAuthorizer {
    pub(crate) fn grant(&self, user: &str, broadcaster: &str) {
        let _ = self
            .grants
            .lock()
            .entry(UserId::from_raw(user))
            .or_default()
            .insert(BroadcasterId::from_raw(broadcaster));
    }

    pub(crate) fn revoke(&self, user: &str, broadcaster: &str) {
        if let Some(set) = self.grants.lock().get_mut(&UserId::from_raw(user)) {
            let _ = set.remove(&BroadcasterId::from_raw(broadcaster));
        }
    }

    pub(crate) fn add_token(&self, token: &str, identity: BroadcasterIdentity) {
        let _ = self.tokens.lock().insert(token.to_owned(), identity);
    }

    pub(crate) fn add_viewer_token(&self, token: &str, identity: ViewerIdentity) {
        let _ = self.viewer_tokens.lock().insert(token.to_owned(), identity);
    }

    async fn pause(&self) -> Result<(), CollaboratorError> {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if *self.fail.lock() {
            return Err(CollaboratorError::Unavailable("down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authenticate_viewer(
        &self,
        token: &str,
    ) -> Result<Option<ViewerIdentity>, CollaboratorError> {
        self.pause().await?;
        Ok(self.viewer_tokens.lock().get(token).cloned())
    }

    async fn authenticate_broadcaster(
        &self,
        token: &str,
    ) -> Result<Option<BroadcasterIdentity>, CollaboratorError> {
        self.pause().await?;
        Ok(self.tokens.lock().get(token).cloned())
    }

    async fn may_view(
        &self,
        viewer: &ViewerIdentity,
        broadcaster: &BroadcasterId,
    ) -> Result<bool, CollaboratorError> {
        self.pause().await?;
        Ok(self
            .grants
            .lock()
            .get(&viewer.user_id)
            .is_some_and(|set| set.contains(broadcaster)))
    }

    async fn visible_broadcasters(
        &self,
        viewer: &ViewerIdentity,
    ) -> Result<HashSet<BroadcasterId>, CollaboratorError> {
        self.pause().await?;
        Ok(self
            .grants
            .lock()
            .get(&viewer.user_id)
            .cloned()
            .unwrap_or_default())
    }
}
