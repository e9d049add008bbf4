//! Connection registry: the live directory of identified connections.
//!
//! Maps each connection handle to the username it claimed in its handshake.
//! A username may own several connections at once; lookups by name return
//! all of them. Every operation goes through one [`RwLock`], so connection
//! tasks can register, unregister and look up concurrently.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh, time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The receiving end of a connection has gone away.
#[derive(Debug, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Handle through which records are delivered to one connection.
///
/// Records pushed here are written to the socket, in order, by the
/// connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiver its writer task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                outbox,
            },
            rx,
        )
    }

    /// The connection's id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a delivery record for this connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionClosed`] if the writer task has stopped.
    pub fn deliver(&self, record: String) -> Result<(), ConnectionClosed> {
        self.outbox.send(record).map_err(|_| ConnectionClosed(self.id))
    }
}

struct Session {
    username: String,
    handle: ConnectionHandle,
}

/// Concurrency-safe map from connection handle to username.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<ConnectionId, Session>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the mapping for `handle`.
    ///
    /// Returns the username previously mapped to this handle, if any.
    pub fn register(&self, handle: ConnectionHandle, username: &str) -> Option<String> {
        let id = handle.id();
        let previous = self.sessions.write().insert(
            id,
            Session {
                username: username.to_string(),
                handle,
            },
        );
        previous.map(|s| s.username)
    }

    /// Removes the mapping for `id`. Removing an absent id is a no-op.
    ///
    /// Returns the username that was mapped, if any.
    pub fn unregister(&self, id: ConnectionId) -> Option<String> {
        self.sessions.write().remove(&id).map(|s| s.username)
    }

    /// Returns every live connection registered under `username`.
    #[must_use]
    pub fn find_by_username(&self, username: &str) -> Vec<ConnectionHandle> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.username == username)
            .map(|s| s.handle.clone())
            .collect()
    }

    /// Returns the username mapped to `id`, if registered.
    #[must_use]
    pub fn username_of(&self, id: ConnectionId) -> Option<String> {
        self.sessions.read().get(&id).map(|s| s.username.clone())
    }

    /// Distinct usernames with at least one live connection, sorted.
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .read()
            .values()
            .map(|s| s.username.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
