//! Parley relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts TCP connections, identifies each by the username in its first
//! frame, and routes text messages and file transfers from a sender to a
//! recipient only when the sender follows the recipient. Users, follow edges
//! and a log of every message live in one SQLite database.

pub mod admin;
pub mod client;
pub mod config;
pub mod db;
pub mod files;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;
pub mod transform;
