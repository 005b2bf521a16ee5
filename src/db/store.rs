//! Durable key-value store backed by SQLite.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::MonitorState;

/// Key holding the serialized [`MonitorState`].
pub const STATE_KEY: &str = "state";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store lock poisoned")]
    Poisoned,
}

/// A string key-value store with full-overwrite writes.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, DbError>;
    fn put(&self, key: &str, value: &str) -> Result<(), DbError>;
}

/// Thread-safe SQLite store.
#[derive(Clone)]
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    /// Open (or create) the store at the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().map_err(|_| DbError::Poisoned)?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// In-memory store that counts writes.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<std::collections::HashMap<String, String>>,
    writes: std::sync::atomic::AtomicUsize,
    fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryKvStore {
    pub fn writes(&self) -> usize {
        self.writes.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        let entries = self.entries.lock().map_err(|_| DbError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), DbError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DbError::Migration("write rejected".to_string()));
        }
        let mut entries = self.entries.lock().map_err(|_| DbError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

/// Load the monitor state, starting fresh when it is absent or unreadable.
pub fn load_state(store: &dyn KvStore) -> MonitorState {
    let raw = match store.get(STATE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            tracing::info!("No stored state found, starting fresh");
            return MonitorState::new();
        }
        Err(e) => {
            tracing::warn!("Failed to read stored state, starting fresh: {}", e);
            return MonitorState::new();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!("Stored state is corrupt, starting fresh: {}", e);
            MonitorState::new()
        }
    }
}

/// Serialize and overwrite the stored monitor state.
pub fn save_state(store: &dyn KvStore, state: &MonitorState) -> Result<(), DbError> {
    let raw = serde_json::to_string(state)?;
    store.put(STATE_KEY, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Incident;
    use tempfile::NamedTempFile;

    #[test]
    fn test_kv_overwrite() {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteKvStore::new(tmp.path()).unwrap();

        assert_eq!(store.get("state").unwrap(), None);

        store.put("state", "one").unwrap();
        assert_eq!(store.get("state").unwrap().as_deref(), Some("one"));

        store.put("state", "two").unwrap();
        assert_eq!(store.get("state").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_state_survives_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let mut state = MonitorState::new();
        state.last_update = 1_700_000_000;
        state
            .incidents
            .insert("web".to_string(), vec![Incident::sentinel(1_699_000_000)]);

        {
            let store = SqliteKvStore::new(tmp.path()).unwrap();
            save_state(&store, &state).unwrap();
        }

        let store = SqliteKvStore::new(tmp.path()).unwrap();
        assert_eq!(load_state(&store), state);
    }

    #[test]
    fn test_load_state_falls_back() {
        let store = MemoryKvStore::default();
        assert_eq!(load_state(&store), MonitorState::new());

        store.put(STATE_KEY, "{not json").unwrap();
        assert_eq!(load_state(&store), MonitorState::new());
    }

    #[test]
    fn test_load_state_with_fractional_latency() {
        let store = MemoryKvStore::default();
        store
            .put(
                STATE_KEY,
                r#"{
                    "version": 1,
                    "lastUpdate": 1700000000,
                    "overallUp": 1,
                    "overallDown": 0,
                    "incident": {"web": [{"start": [1699000000], "error": ["dummy"], "end": 1699000000}]},
                    "latency": {"web": {
                        "recent": [{"loc": "FRA", "ping": 12.5, "time": 1700000000}],
                        "all": [{"loc": "FRA", "ping": 7, "time": 1699990000}]
                    }}
                }"#,
            )
            .unwrap();

        let state = load_state(&store);
        assert_eq!(state.last_update, 1_700_000_000);
        assert_eq!(state.incidents["web"], vec![Incident::sentinel(1_699_000_000)]);
        assert_eq!(state.latency["web"].recent[0].latency_ms, 13);
        assert_eq!(state.latency["web"].all[0].latency_ms, 7);
    }
}
