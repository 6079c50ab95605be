//! Durable broadcasters and their credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use lookout_core::{BroadcasterId, IssuedToken, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// A stored broadcaster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcasterRow {
    /// Durable id.
    pub id: BroadcasterId,
    /// Registered name.
    pub name: String,
    /// Owning user.
    pub owner_id: UserId,
    /// Whether the broadcaster may connect.
    pub is_active: bool,
    /// Expiry of the long-lived token.
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Expiry of the installation token.
    pub installation_token_expires_at: Option<DateTime<Utc>>,
    /// Last successful authentication.
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Result of a credential lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenMatch {
    /// Matching broadcaster.
    pub broadcaster: BroadcasterRow,
    /// The presented token was the installation token.
    pub via_installation: bool,
}

/// Access to the `broadcasters` table.
pub struct BroadcasterRepo {
    db: Database,
}

const COLUMNS: &str = "id, name, owner_id, is_active, token_expires_at, \
     installation_token_expires_at, last_connected_at, token, installation_token";

type RawRow = (
    String,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn parse_time(
    raw: Option<String>,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::CorruptRow {
                table: "broadcasters",
                column,
                detail: e.to_string(),
            })
    })
    .transpose()
}

fn into_row(raw: RawRow) -> Result<BroadcasterRow, StoreError> {
    let (id, name, owner, is_active, token_exp, inst_exp, last, _, _) = raw;
    Ok(BroadcasterRow {
        id: BroadcasterId::from_raw(id),
        name,
        owner_id: UserId::from_raw(owner),
        is_active,
        token_expires_at: parse_time(token_exp, "token_expires_at")?,
        installation_token_expires_at: parse_time(inst_exp, "installation_token_expires_at")?,
        last_connected_at: parse_time(last, "last_connected_at")?,
    })
}

impl BroadcasterRepo {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create an active broadcaster without credentials.
    #[instrument(skip(self), fields(owner_id = %owner))]
    pub fn create(&self, name: &str, owner: &UserId) -> Result<BroadcasterRow, StoreError> {
        let id = BroadcasterId::from_raw(format!("bc_{}", Uuid::now_v7()));
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO broadcasters (id, name, owner_id, is_active, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                rusqlite::params![id.as_str(), name, owner.as_str(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        self.get(&id)
    }

    /// Fetch a broadcaster by id.
    #[instrument(skip(self), fields(broadcaster_id = %id))]
    pub fn get(&self, id: &BroadcasterId) -> Result<BroadcasterRow, StoreError> {
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM broadcasters WHERE id = ?1"),
                    [id.as_str()],
                    read_raw,
                )
                .map_err(|_| StoreError::NotFound(format!("broadcaster {id}")))?;
            into_row(raw)
        })
    }

    /// Store both credentials for a broadcaster.
    #[instrument(skip_all, fields(broadcaster_id = %id))]
    pub fn set_tokens(
        &self,
        id: &BroadcasterId,
        token: &IssuedToken,
        installation: Option<&IssuedToken>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE broadcasters
                 SET token = ?1, token_expires_at = ?2,
                     installation_token = ?3, installation_token_expires_at = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    token.token,
                    token.expires_at.to_rfc3339(),
                    installation.map(|t| t.token.as_str()),
                    installation.map(|t| t.expires_at.to_rfc3339()),
                    id.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("broadcaster {id}")));
            }
            Ok(())
        })
    }

    /// Replace the long-lived token and burn the installation token.
    #[instrument(skip_all, fields(broadcaster_id = %id))]
    pub fn rotate_token(&self, id: &BroadcasterId, token: &IssuedToken) -> Result<(), StoreError> {
        self.set_tokens(id, token, None)
    }

    /// Find the active broadcaster holding `token` as either credential.
    ///
    /// Expired credentials do not match.
    #[instrument(skip_all)]
    pub fn find_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TokenMatch>, StoreError> {
        let raw = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM broadcasters
                 WHERE (token = ?1 OR installation_token = ?1) AND is_active = 1
                 LIMIT 1"
            ))?;
            let mut rows = stmt.query_map([token], read_raw)?;
            Ok(rows.next().transpose()?)
        })?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let via_installation = raw.8.as_deref() == Some(token) && raw.7.as_deref() != Some(token);
        let broadcaster = into_row(raw)?;
        let expiry = if via_installation {
            broadcaster.installation_token_expires_at
        } else {
            broadcaster.token_expires_at
        };
        if expiry.is_none_or(|t| t <= now) {
            return Ok(None);
        }
        Ok(Some(TokenMatch {
            broadcaster,
            via_installation,
        }))
    }

    /// Record a successful connection.
    #[instrument(skip(self), fields(broadcaster_id = %id))]
    pub fn touch_last_connected(
        &self,
        id: &BroadcasterId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "UPDATE broadcasters SET last_connected_at = ?1 WHERE id = ?2",
                rusqlite::params![at.to_rfc3339(), id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Enable or disable a broadcaster.
    #[instrument(skip(self), fields(broadcaster_id = %id))]
    pub fn set_active(&self, id: &BroadcasterId, active: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "UPDATE broadcasters SET is_active = ?1 WHERE id = ?2",
                rusqlite::params![active, id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Broadcasters owned by `owner`, newest first.
    #[instrument(skip(self), fields(owner_id = %owner))]
    pub fn list_by_owner(&self, owner: &UserId) -> Result<Vec<BroadcasterRow>, StoreError> {
        let raws = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM broadcasters WHERE owner_id = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([owner.as_str()], read_raw)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        raws.into_iter().map(into_row).collect()
    }
}
