//! Credential store: registration and login verification.
//!
//! Passwords are stored as given; hashing is not part of this store's
//! contract.

use std::sync::Arc;

use rusqlite::OptionalExtension;

use super::{StoreError, is_constraint_violation};
use crate::db::Database;

/// Persists usernames and passwords.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    /// Creates a store over `db`.
    #[must_use]
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Registers a new user. An existing user is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the username is taken, or
    /// [`StoreError::InvalidUsername`] if it cannot be used on the wire.
    pub fn register(&self, username: &str, password: &str) -> Result<(), StoreError> {
        parley_proto::record::validate_username(username)?;

        self.db.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (username, password),
            ) {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => {
                    Err(StoreError::AlreadyExists(format!("user {username}")))
                }
                Err(e) => Err(e.into()),
            }
        })?;

        tracing::info!(username = %username, "user registered");
        Ok(())
    }

    /// Verifies a login. Both fields must match exactly.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidCredentials`] for an unknown user or a
    /// wrong password.
    pub fn verify(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let stored: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT password FROM users WHERE username = ?1",
                    [username],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match stored {
            Some(stored) if constant_time_eq(stored.as_bytes(), password.as_bytes()) => Ok(()),
            _ => {
                tracing::debug!(username = %username, "login rejected");
                Err(StoreError::InvalidCredentials)
            }
        }
    }

    /// Returns whether `username` is registered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn exists(&self, username: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| user_exists(conn, username))
    }

    /// Lists registered usernames in order, optionally leaving one out
    /// (the contact list a logged-in user sees).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn list_usernames(&self, excluding: Option<&str>) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username FROM users WHERE ?1 IS NULL OR username != ?1 ORDER BY username",
            )?;
            let names = stmt
                .query_map([excluding], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }
}

pub(super) fn user_exists(conn: &rusqlite::Connection, username: &str) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        [username],
        |row| row.get(0),
    )?)
}

/// Compares two byte strings without an early exit on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
