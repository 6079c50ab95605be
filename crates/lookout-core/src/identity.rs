//! Identities resolved by the authorization collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BroadcasterId, UserId};

/// Account role carried in a viewer's bearer token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Plain viewer; sees only broadcasters it holds a grant for.
    #[default]
    Viewer,
    /// Owner of broadcasters; also sees everything it owns.
    Owner,
}

/// A viewer whose bearer credential was verified at connect time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerIdentity {
    /// Durable user id.
    pub user_id: UserId,
    /// Login name, for logs.
    pub username: String,
    /// Account role.
    pub role: UserRole,
}

/// A token minted for a broadcaster during authentication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Encoded bearer token.
    pub token: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// A broadcaster that presented a valid broadcaster or installation token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcasterIdentity {
    /// Durable broadcaster id.
    pub broadcaster_id: BroadcasterId,
    /// Registered name.
    pub name: String,
    /// Owning user.
    pub owner_id: UserId,
    /// Set when an installation token was exchanged for a long-lived one.
    pub issued_token: Option<IssuedToken>,
}
