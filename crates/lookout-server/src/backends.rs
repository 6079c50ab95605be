//! SQLite-backed collaborators: the authorizer and the telemetry sink.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lookout_auth::{TokenKind, TokenService};
use lookout_core::{BroadcasterId, BroadcasterIdentity, TelemetryReport, ViewerIdentity};
use lookout_store::{ActivityRepo, BroadcasterRepo, Database, PermissionRepo, StoreError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CollaboratorError;
use crate::signaling::fanout::{TelemetrySink, TelemetrySource};
use crate::signaling::gate::Authorizer;

impl From<StoreError> for CollaboratorError {
    fn from(e: StoreError) -> Self {
        Self::Backend(e.to_string())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, CollaboratorError>
where
    F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CollaboratorError::Unavailable(format!("blocking task failed: {e}")))?
}

/// Authorizer over the SQLite store and HS256 tokens.
///
/// Installation tokens are exchanged for a fresh long-lived broadcaster
/// token on first use; the installation token is burned in the same step.
pub struct StoreAuthorizer {
    db: Database,
    tokens: TokenService,
    broadcaster_ttl: chrono::Duration,
}

impl StoreAuthorizer {
    /// Create an authorizer. `broadcaster_ttl` is the lifetime of tokens
    /// issued during installation exchange.
    pub fn new(db: Database, tokens: TokenService, broadcaster_ttl: chrono::Duration) -> Self {
        Self {
            db,
            tokens,
            broadcaster_ttl,
        }
    }

    fn resolve_broadcaster(
        db: &Database,
        tokens: &TokenService,
        ttl: chrono::Duration,
        token: &str,
    ) -> Result<Option<BroadcasterIdentity>, CollaboratorError> {
        if let Err(e) = tokens.verify_broadcaster(token) {
            debug!(error = %e, "broadcaster token rejected");
            return Ok(None);
        }
        let repo = BroadcasterRepo::new(db.clone());
        let now = Utc::now();
        let Some(found) = repo.find_by_token(token, now)? else {
            return Ok(None);
        };
        let broadcaster = found.broadcaster;

        let issued_token = if found.via_installation {
            let issued = tokens
                .issue_broadcaster(&broadcaster.id, &broadcaster.owner_id, TokenKind::Broadcaster, ttl)
                .map_err(|e| CollaboratorError::Backend(e.to_string()))?;
            repo.rotate_token(&broadcaster.id, &issued)?;
            info!(broadcaster_id = %broadcaster.id, "installation token exchanged");
            Some(issued)
        } else {
            None
        };
        repo.touch_last_connected(&broadcaster.id, now)?;

        Ok(Some(BroadcasterIdentity {
            broadcaster_id: broadcaster.id,
            name: broadcaster.name,
            owner_id: broadcaster.owner_id,
            issued_token,
        }))
    }
}

#[async_trait]
impl Authorizer for StoreAuthorizer {
    async fn authenticate_viewer(
        &self,
        token: &str,
    ) -> Result<Option<ViewerIdentity>, CollaboratorError> {
        match self.tokens.verify_viewer(token) {
            Ok(identity) => Ok(Some(identity)),
            Err(e) => {
                debug!(error = %e, "viewer token rejected");
                Ok(None)
            }
        }
    }

    async fn authenticate_broadcaster(
        &self,
        token: &str,
    ) -> Result<Option<BroadcasterIdentity>, CollaboratorError> {
        let db = self.db.clone();
        let tokens = self.tokens.clone();
        let ttl = self.broadcaster_ttl;
        let token = token.to_owned();
        blocking(move || Self::resolve_broadcaster(&db, &tokens, ttl, &token)).await
    }

    async fn may_view(
        &self,
        viewer: &ViewerIdentity,
        broadcaster: &BroadcasterId,
    ) -> Result<bool, CollaboratorError> {
        let repo = PermissionRepo::new(self.db.clone());
        let broadcaster = broadcaster.clone();
        let user = viewer.user_id.clone();
        blocking(move || Ok(repo.may_view(&broadcaster, &user)?)).await
    }

    async fn visible_broadcasters(
        &self,
        viewer: &ViewerIdentity,
    ) -> Result<HashSet<BroadcasterId>, CollaboratorError> {
        let repo = PermissionRepo::new(self.db.clone());
        let user = viewer.user_id.clone();
        blocking(move || Ok(repo.visible_to(&user)?.into_iter().collect())).await
    }
}

/// Telemetry sink writing to the `activities` and `browser_history` tables.
pub struct StoreTelemetrySink {
    db: Database,
}

impl StoreTelemetrySink {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TelemetrySink for StoreTelemetrySink {
    async fn record(
        &self,
        source: TelemetrySource,
        report: Arc<TelemetryReport>,
        received_at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError> {
        let repo = ActivityRepo::new(self.db.clone());
        let outcome = blocking(move || {
            Ok(repo.record(
                &source.broadcaster_id,
                source.installation_id.as_ref(),
                &report,
                received_at,
            )?)
        })
        .await?;
        debug!(
            inserted = outcome.history_inserted,
            duplicates = outcome.history_duplicates,
            "telemetry persisted"
        );
        Ok(())
    }
}

/// Prune telemetry older than `retention_days` every `every` until
/// `cancel` fires.
pub fn spawn_retention_task(
    db: Database,
    retention_days: u32,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let repo = ActivityRepo::new(db.clone());
                    let result = blocking(move || {
                        Ok(repo.prune_older_than(retention_days, Utc::now())?)
                    })
                    .await;
                    match result {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, retention_days, "pruned old telemetry"),
                        Err(e) => warn!(error = %e, "telemetry pruning failed"),
                    }
                }
            }
        }
    })
}
