//! Durable key-value storage for JSON values.
//!
//! The daemon is the only writer. Absence of a key is reported as `Ok(None)`
//! and means "uninitialized", never an error.

use crate::error::{CoreError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// SQLite-backed store: one `kv` table, a connection per operation.
pub struct SqliteKvStore {
    path: PathBuf,
}

impl SqliteKvStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| CoreError::Io {
                context: "Failed to create database directory".to_string(),
                source: err,
            })?;
        }
        let store = Self { path };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                 );",
            )
            .map_err(|err| CoreError::storage("Failed to initialize schema", err))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| CoreError::storage("Failed to open sqlite db", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| CoreError::storage("Failed to enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| CoreError::storage("Failed to set synchronous", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| CoreError::storage("Failed to set busy_timeout", err))?;

        Ok(conn)
    }
}

impl KvStore for SqliteKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = self.with_connection(|conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|err| CoreError::storage("Failed to read key", err))
        })?;

        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|err| CoreError::json(key, err)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value).map_err(|err| CoreError::json(key, err))?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET \
                    value = excluded.value, \
                    updated_at = excluded.updated_at",
                params![key, text, Utc::now().to_rfc3339()],
            )
            .map_err(|err| CoreError::storage("Failed to write key", err))?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|err| CoreError::storage("Failed to delete key", err))?;
            Ok(())
        })
    }
}

/// Volatile store for tests and for running without a database.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::storage("memory store", "lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::storage("memory store", "lock poisoned"))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::storage("memory store", "lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sqlite_store_round_trips_values() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteKvStore::new(temp_dir.path().join("db").join("state.db")).expect("store");

        assert_eq!(store.get("missing").expect("get"), None);

        store.set("answer", &json!({ "value": 42 })).expect("set");
        store.set("answer", &json!({ "value": 43 })).expect("overwrite");
        assert_eq!(store.get("answer").expect("get"), Some(json!({ "value": 43 })));

        store.remove("answer").expect("remove");
        assert_eq!(store.get("answer").expect("get"), None);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("state.db");
        SqliteKvStore::new(path.clone())
            .expect("store")
            .set("k", &json!([1, 2, 3]))
            .expect("set");

        let reopened = SqliteKvStore::new(path).expect("reopen");
        assert_eq!(reopened.get("k").expect("get"), Some(json!([1, 2, 3])));
    }

    #[test]
    fn memory_store_treats_missing_as_none() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("nope").expect("get"), None);
        store.remove("nope").expect("remove missing");
    }
}
