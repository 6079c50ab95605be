//! User accounts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use lookout_core::{UserId, UserRole};

use crate::database::Database;
use crate::error::StoreError;

/// A stored user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    /// User id.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Account role.
    pub role: UserRole,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

/// Access to the `users` table.
pub struct UserRepo {
    db: Database,
}

fn role_str(role: UserRole) -> &'static str {
    match role {
        UserRole::Viewer => "viewer",
        UserRole::Owner => "owner",
    }
}

fn parse_role(raw: &str) -> Result<UserRole, StoreError> {
    match raw {
        "viewer" => Ok(UserRole::Viewer),
        "owner" => Ok(UserRole::Owner),
        other => Err(StoreError::CorruptRow {
            table: "users",
            column: "role",
            detail: format!("unknown variant: {other}"),
        }),
    }
}

impl UserRepo {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user.
    #[instrument(skip(self))]
    pub fn create(&self, username: &str, role: UserRole) -> Result<UserRow, StoreError> {
        let row = UserRow {
            id: UserId::from_raw(format!("usr_{}", Uuid::now_v7())),
            username: username.to_owned(),
            role,
            created_at: Utc::now().to_rfc3339(),
        };
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO users (id, username, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![row.id.as_str(), row.username, role_str(role), row.created_at],
            )?;
            Ok(())
        })?;
        Ok(row)
    }

    /// Look up a user by id.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let (id, username, role, created_at): (String, String, String, String) = conn
                .query_row(
                    "SELECT id, username, role, created_at FROM users WHERE id = ?1",
                    [id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .map_err(|_| StoreError::NotFound(format!("user {id}")))?;
            Ok(UserRow {
                id: UserId::from_raw(id),
                username,
                role: parse_role(&role)?,
                created_at,
            })
        })
    }
}
