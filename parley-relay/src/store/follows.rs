//! Follow graph store.
//!
//! An edge `(follower, followed)` means `follower` may send messages and
//! files to `followed`. Both users must be registered when the edge is
//! created. Self-follow is allowed.

use std::sync::Arc;

use super::users::user_exists;
use super::{StoreError, is_constraint_violation};
use crate::db::Database;

/// Persists directed follow edges.
#[derive(Clone)]
pub struct FollowStore {
    db: Arc<Database>,
}

impl FollowStore {
    /// Creates a store over `db`.
    #[must_use]
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Adds the edge `follower → followed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if either user is not registered, or
    /// [`StoreError::AlreadyExists`] if the edge is already present.
    pub fn follow(&self, follower: &str, followed: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            for name in [follower, followed] {
                if !user_exists(conn, name)? {
                    return Err(StoreError::NotFound(name.to_string()));
                }
            }
            match conn.execute(
                "INSERT INTO followers (follower, followed) VALUES (?1, ?2)",
                (follower, followed),
            ) {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::AlreadyExists(format!(
                    "follow {follower} -> {followed}"
                ))),
                Err(e) => Err(e.into()),
            }
        })?;

        tracing::info!(follower = %follower, followed = %followed, "follow added");
        Ok(())
    }

    /// Removes the edge `follower → followed`. Removing an absent edge is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn unfollow(&self, follower: &str, followed: &str) -> Result<(), StoreError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM followers WHERE follower = ?1 AND followed = ?2",
                (follower, followed),
            )?)
        })?;

        tracing::info!(
            follower = %follower,
            followed = %followed,
            existed = removed > 0,
            "follow removed"
        );
        Ok(())
    }

    /// Returns whether the edge `follower → followed` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn is_following(&self, follower: &str, followed: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM followers WHERE follower = ?1 AND followed = ?2)",
                (follower, followed),
                |row| row.get(0),
            )?)
        })
    }

    /// Lists the users `follower` follows, in name order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn following(&self, follower: &str) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT followed FROM followers WHERE follower = ?1 ORDER BY followed")?;
            let names = stmt
                .query_map([follower], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }
}
