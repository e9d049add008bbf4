//! SQLite database shared by the credential, follow and message stores.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::store::StoreError;

/// A single SQLite connection guarded by a mutex.
///
/// Every store call takes the lock for one statement (or one short group
/// of statements); no transaction spans more than one store call.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and runs migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the parent directory cannot be created or
    /// SQLite fails to open or migrate the file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&conn)?;

        tracing::info!(path = %path.display(), "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database, used by tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if SQLite fails to initialize.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `f` with exclusive access to the connection.
    ///
    /// # Errors
    ///
    /// Propagates whatever `f` returns.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            username    TEXT PRIMARY KEY,
            password    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender      TEXT NOT NULL,
            recipient   TEXT NOT NULL,
            body        TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender, recipient);

        CREATE TABLE IF NOT EXISTS followers (
            follower    TEXT NOT NULL,
            followed    TEXT NOT NULL,
            PRIMARY KEY (follower, followed)
        );
        ",
    )?;

    tracing::debug!("database migrations complete");
    Ok(())
}
