//! Append-only message log.
//!
//! Every well-formed text frame is appended, whether or not it is later
//! delivered. Sender and recipient are not checked against the user table.

use std::sync::Arc;

use super::StoreError;
use crate::db::Database;

/// One row of the message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    /// Monotonic row id.
    pub id: i64,
    /// Username of the author.
    pub sender: String,
    /// Username of the addressee.
    pub recipient: String,
    /// Message text as logged.
    pub body: String,
}

/// Persists accepted text messages.
#[derive(Clone)]
pub struct MessageLog {
    db: Arc<Database>,
}

impl MessageLog {
    /// Creates a log over `db`.
    #[must_use]
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Appends a message and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn append(&self, sender: &str, recipient: &str, body: &str) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender, recipient, body) VALUES (?1, ?2, ?3)",
                (sender, recipient, body),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Number of logged messages.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
        })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Messages exchanged between `a` and `b` in either direction, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on SQLite failure.
    pub fn between(&self, a: &str, b: &str) -> Result<Vec<LoggedMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, recipient, body FROM messages
                 WHERE (sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1)
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map((a, b), |row| {
                    Ok(LoggedMessage {
                        id: row.get(0)?,
                        sender: row.get(1)?,
                        recipient: row.get(2)?,
                        body: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
