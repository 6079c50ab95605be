//! Viewer permission grants.

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use lookout_core::{BroadcasterId, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// Access to the `broadcaster_permissions` table.
pub struct PermissionRepo {
    db: Database,
}

impl PermissionRepo {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Grant `viewer` access to `broadcaster`.
    ///
    /// Only the broadcaster's owner may grant. Returns `false` when the
    /// grant already existed.
    #[instrument(skip(self), fields(broadcaster_id = %broadcaster, viewer_id = %viewer))]
    pub fn grant(
        &self,
        broadcaster: &BroadcasterId,
        viewer: &UserId,
        granted_by: &UserId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT owner_id FROM broadcasters WHERE id = ?1",
                    [broadcaster.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match owner {
                None => return Err(StoreError::NotFound(format!("broadcaster {broadcaster}"))),
                Some(o) if o != granted_by.as_str() => {
                    return Err(StoreError::PermissionDenied(
                        "only the broadcaster owner can grant permissions".into(),
                    ));
                }
                Some(_) => {}
            }
            let inserted = conn.execute(
                "INSERT INTO broadcaster_permissions (broadcaster_id, viewer_id, granted_by, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (broadcaster_id, viewer_id) DO NOTHING",
                rusqlite::params![
                    broadcaster.as_str(),
                    viewer.as_str(),
                    granted_by.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Remove a grant. Returns `false` when none existed.
    #[instrument(skip(self), fields(broadcaster_id = %broadcaster, viewer_id = %viewer))]
    pub fn revoke(&self, broadcaster: &BroadcasterId, viewer: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM broadcaster_permissions WHERE broadcaster_id = ?1 AND viewer_id = ?2",
                [broadcaster.as_str(), viewer.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    /// Whether `viewer` may see `broadcaster`, either through a grant or
    /// by owning it. Inactive broadcasters are never visible.
    pub fn may_view(&self, broadcaster: &BroadcasterId, viewer: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM broadcasters b
                     WHERE b.id = ?1 AND b.is_active = 1
                       AND (b.owner_id = ?2 OR EXISTS (
                           SELECT 1 FROM broadcaster_permissions p
                           WHERE p.broadcaster_id = b.id AND p.viewer_id = ?2))",
                    [broadcaster.as_str(), viewer.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Every active broadcaster `viewer` may see.
    pub fn visible_to(&self, viewer: &UserId) -> Result<Vec<BroadcasterId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.id FROM broadcasters b
                 WHERE b.is_active = 1
                   AND (b.owner_id = ?1 OR EXISTS (
                       SELECT 1 FROM broadcaster_permissions p
                       WHERE p.broadcaster_id = b.id AND p.viewer_id = ?1))
                 ORDER BY b.id",
            )?;
            let ids = stmt
                .query_map([viewer.as_str()], |row| row.get::<_, String>(0))?
                .map(|r| r.map(BroadcasterId::from_raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcasters::BroadcasterRepo;
    use crate::users::UserRepo;
    use lookout_core::UserRole;

    struct Fixture {
        perms: PermissionRepo,
        broadcasters: BroadcasterRepo,
        owner: UserId,
        viewer: UserId,
        bc: BroadcasterId,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let owner = users.create("owner", UserRole::Owner).unwrap().id;
        let viewer = users.create("viewer", UserRole::Viewer).unwrap().id;
        let broadcasters = BroadcasterRepo::new(db.clone());
        let bc = broadcasters.create("Desk-7", &owner).unwrap().id;
        Fixture {
            perms: PermissionRepo::new(db),
            broadcasters,
            owner,
            viewer,
            bc,
        }
    }

    #[test]
    fn grant_then_view() {
        let f = fixture();
        assert!(!f.perms.may_view(&f.bc, &f.viewer).unwrap());
        assert!(f.perms.grant(&f.bc, &f.viewer, &f.owner).unwrap());
        assert!(f.perms.may_view(&f.bc, &f.viewer).unwrap());
        assert_eq!(f.perms.visible_to(&f.viewer).unwrap(), vec![f.bc.clone()]);
    }

    #[test]
    fn grant_is_idempotent() {
        let f = fixture();
        assert!(f.perms.grant(&f.bc, &f.viewer, &f.owner).unwrap());
        assert!(!f.perms.grant(&f.bc, &f.viewer, &f.owner).unwrap());
    }

    #[test]
    fn only_owner_can_grant() {
        let f = fixture();
        let err = f.perms.grant(&f.bc, &f.viewer, &f.viewer).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));
    }

    #[test]
    fn owner_sees_own_broadcasters() {
        let f = fixture();
        assert!(f.perms.may_view(&f.bc, &f.owner).unwrap());
    }

    #[test]
    fn revoke_removes_visibility() {
        let f = fixture();
        let _ = f.perms.grant(&f.bc, &f.viewer, &f.owner).unwrap();
        assert!(f.perms.revoke(&f.bc, &f.viewer).unwrap());
        assert!(!f.perms.may_view(&f.bc, &f.viewer).unwrap());
        assert!(!f.perms.revoke(&f.bc, &f.viewer).unwrap());
    }

    #[test]
    fn inactive_broadcaster_is_hidden() {
        let f = fixture();
        let _ = f.perms.grant(&f.bc, &f.viewer, &f.owner).unwrap();
        f.broadcasters.set_active(&f.bc, false).unwrap();
        assert!(!f.perms.may_view(&f.bc, &f.viewer).unwrap());
        assert!(f.perms.visible_to(&f.viewer).unwrap().is_empty());
    }
}
