//! Persistent stores backed by the shared [`Database`].
//!
//! - [`CredentialStore`]: usernames and passwords.
//! - [`FollowStore`]: directed follow edges that gate delivery.
//! - [`MessageLog`]: append-only log of every accepted text message.

mod follows;
mod messages;
mod users;

use std::sync::Arc;

use parley_proto::record::RecordError;

use crate::db::Database;

pub use follows::FollowStore;
pub use messages::{LoggedMessage, MessageLog};
pub use users::CredentialStore;

/// Errors returned by the stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The user or follow edge is already present.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A referenced user is not registered.
    #[error("user {0} not found")]
    NotFound(String),

    /// Login verification failed.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The username cannot be used on the wire.
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] RecordError),

    /// The database directory could not be created.
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        /// Directory that was attempted.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// SQLite failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// The three stores over one database.
#[derive(Clone)]
pub struct Stores {
    /// Credential store.
    pub users: CredentialStore,
    /// Follow graph store.
    pub follows: FollowStore,
    /// Message log.
    pub messages: MessageLog,
}

impl Stores {
    /// Builds all stores over `db`.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            users: CredentialStore::new(Arc::clone(&db)),
            follows: FollowStore::new(Arc::clone(&db)),
            messages: MessageLog::new(db),
        }
    }

    /// Builds stores over a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if SQLite fails to initialize.
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(Database::open_in_memory()?)))
    }
}

/// True when `err` is a UNIQUE / PRIMARY KEY constraint violation.
fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
