//! Key/value persistence of orchestration state.
//!
//! Every logical collection (bots, chats, active chat, selected bot) is
//! stored under its own key as JSON text. Reads never fail the caller:
//! absent or corrupt values are replaced by the type's default.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use botdesk_core::error::BotdeskError;

use crate::db::Database;

/// Durable key/value store. Last write wins; no partial-write rollback.
pub trait PersistentStore: Send + Sync {
    /// Read the raw value stored under `key`.
    fn load(&self, key: &str) -> Result<Option<String>, BotdeskError>;

    /// Replace the raw value stored under `key`.
    fn save(&self, key: &str, value: &str) -> Result<(), BotdeskError>;
}

/// Keys of the persisted collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateKey {
    Chats,
    Bots,
    ActiveChatId,
    SelectedBotId,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Chats => "chats",
            StateKey::Bots => "bots",
            StateKey::ActiveChatId => "currentChatId",
            StateKey::SelectedBotId => "selectedBotId",
        }
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load and decode the value under `key`, falling back to `T::default()`
/// when it is absent, unreadable, or not valid JSON for `T`.
pub fn load_or_default<T>(store: &dyn PersistentStore, key: StateKey) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match store.load(key.as_str()) {
        Ok(Some(raw)) => raw,
        Ok(None) => return T::default(),
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to read persisted state, using default");
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(key = %key, error = %e, "Corrupt persisted state, using default");
            T::default()
        }
    }
}

/// Encode `value` as JSON and write it under `key`.
///
/// Failures are logged and swallowed: the in-memory state stays
/// authoritative for the running session.
pub fn save_json<T>(store: &dyn PersistentStore, key: StateKey, value: &T)
where
    T: Serialize + ?Sized,
{
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            error!(key = %key, error = %e, "Failed to encode state");
            return;
        }
    };
    match store.save(key.as_str(), &raw) {
        Ok(()) => debug!(key = %key, bytes = raw.len(), "State persisted"),
        Err(e) => error!(key = %key, error = %e, "Failed to persist state"),
    }
}

// =============================================================================
// SqliteStore
// =============================================================================

/// [`PersistentStore`] backed by the `kv_store` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl PersistentStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<String>, BotdeskError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| BotdeskError::Storage(format!("Failed to load {}: {}", key, e)))
        })
    }

    fn save(&self, key: &str, value: &str) -> Result<(), BotdeskError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                rusqlite::params![key, value],
            )
            .map_err(|e| BotdeskError::Storage(format!("Failed to save {}: {}", key, e)))?;
            Ok(())
        })
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// Volatile [`PersistentStore`] for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, BotdeskError> {
        let values = self
            .values
            .lock()
            .map_err(|e| BotdeskError::Storage(format!("Store lock poisoned: {}", e)))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), BotdeskError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| BotdeskError::Storage(format!("Store lock poisoned: {}", e)))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Store whose every call fails.
    struct BrokenStore;

    impl PersistentStore for BrokenStore {
        fn load(&self, _key: &str) -> Result<Option<String>, BotdeskError> {
            Err(BotdeskError::Storage("disk unreadable".to_string()))
        }

        fn save(&self, _key: &str, _value: &str) -> Result<(), BotdeskError> {
            Err(BotdeskError::Storage("disk full".to_string()))
        }
    }

    fn sqlite_store() -> SqliteStore {
        SqliteStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    // ---- Raw contract ----

    #[test]
    fn test_sqlite_load_absent() {
        let store = sqlite_store();
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_save_then_load() {
        let store = sqlite_store();
        store.save("k", "v1").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn test_sqlite_last_write_wins() {
        let store = sqlite_store();
        store.save("k", "v1").unwrap();
        store.save("k", "v2").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn test_sqlite_keys_are_independent() {
        let store = sqlite_store();
        store.save("a", "1").unwrap();
        store.save("b", "2").unwrap();
        assert_eq!(store.load("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.load("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = SqliteStore::new(Arc::new(Database::new(&path).unwrap()));
            store.save("chats", "[]").unwrap();
        }
        let store = SqliteStore::new(Arc::new(Database::new(&path).unwrap()));
        assert_eq!(store.load("chats").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load("k").unwrap().is_none());
        store.save("k", "v").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("v"));
    }

    // ---- Typed helpers ----

    #[test]
    fn test_typed_roundtrip() {
        let store = sqlite_store();
        save_json(&store, StateKey::Bots, &vec!["a".to_string(), "b".to_string()]);
        let loaded: Vec<String> = load_or_default(&store, StateKey::Bots);
        assert_eq!(loaded, vec!["a", "b"]);
    }

    #[test]
    fn test_absent_value_uses_default() {
        let store = MemoryStore::new();
        let loaded: Vec<String> = load_or_default(&store, StateKey::Chats);
        assert!(loaded.is_empty());
        let active: Option<String> = load_or_default(&store, StateKey::ActiveChatId);
        assert!(active.is_none());
    }

    #[test]
    fn test_corrupt_value_uses_default() {
        let store = MemoryStore::new();
        store.save(StateKey::Chats.as_str(), "{not json").unwrap();
        let loaded: Vec<String> = load_or_default(&store, StateKey::Chats);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_wrong_shape_uses_default() {
        let store = MemoryStore::new();
        store.save(StateKey::Bots.as_str(), "{\"a\": 1}").unwrap();
        let loaded: Vec<String> = load_or_default(&store, StateKey::Bots);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_unreadable_store_uses_default() {
        let loaded: Vec<String> = load_or_default(&BrokenStore, StateKey::Chats);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_failed_write_is_swallowed() {
        save_json(&BrokenStore, StateKey::Chats, &Vec::<String>::new());
    }

    #[test]
    fn test_state_key_names() {
        assert_eq!(StateKey::Chats.as_str(), "chats");
        assert_eq!(StateKey::Bots.as_str(), "bots");
        assert_eq!(StateKey::ActiveChatId.as_str(), "currentChatId");
        assert_eq!(StateKey::SelectedBotId.as_str(), "selectedBotId");
    }
}
