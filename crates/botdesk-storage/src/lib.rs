//! botdesk storage crate - durable key/value persistence of chat state.
//!
//! Provides a WAL-mode SQLite database with migrations, the
//! [`PersistentStore`] contract, and typed JSON helpers that recover from
//! absent or corrupt values by substituting defaults.

pub mod db;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use store::{load_or_default, save_json, MemoryStore, PersistentStore, SqliteStore, StateKey};
