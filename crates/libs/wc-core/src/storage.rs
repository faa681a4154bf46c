//! Durable key/value storage used by the sequence stores, the JSON-RPC history
//! and the key agreement service.

use crate::error::StorageError;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

pub fn get_json<T: DeserializeOwned>(
    storage: &dyn KeyValueStorage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(
    storage: &dyn KeyValueStorage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value)?;
    storage.set(key, &bytes)
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("storage entries mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored keys starting with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let guard = self.entries.lock().expect("storage entries mutex poisoned");
        guard.keys().filter(|key| key.starts_with(prefix)).cloned().collect()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let guard = self.entries.lock().expect("storage entries mutex poisoned");
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().expect("storage entries mutex poisoned");
        guard.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock().expect("storage entries mutex poisoned");
        guard.remove(key);
        Ok(())
    }
}

/// SQLite-backed storage, one row per key.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )?;
        log::debug!("sqlite key/value schema ready");
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl KeyValueStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let value = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute(
            "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_set_get_delete() {
        let storage = MemoryStorage::new();
        storage.set("a", b"one").expect("set");
        assert_eq!(storage.get("a").expect("get"), Some(b"one".to_vec()));
        storage.delete("a").expect("delete");
        assert_eq!(storage.get("a").expect("get"), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn memory_storage_lists_keys_by_prefix() {
        let storage = MemoryStorage::new();
        storage.set("wc.crypto.b", b"2").expect("set");
        storage.set("wc.crypto.a", b"1").expect("set");
        storage.set("wc.history", b"3").expect("set");
        assert_eq!(storage.keys_with_prefix("wc.crypto."), vec!["wc.crypto.a", "wc.crypto.b"]);
        assert!(storage.keys_with_prefix("other").is_empty());
    }

    #[test]
    fn sqlite_storage_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kv.sqlite");
        {
            let storage = SqliteStorage::open(&path).expect("open");
            set_json(&storage, "numbers", &vec![1_u32, 2, 3]).expect("set");
            storage.set("gone", b"x").expect("set");
            storage.delete("gone").expect("delete");
        }
        let storage = SqliteStorage::open(&path).expect("reopen");
        let numbers: Option<Vec<u32>> = get_json(&storage, "numbers").expect("get");
        assert_eq!(numbers, Some(vec![1, 2, 3]));
        assert_eq!(storage.get("gone").expect("get"), None);
    }

    #[test]
    fn sqlite_storage_overwrites_existing_key() {
        let storage = SqliteStorage::in_memory().expect("open");
        storage.set("k", b"first").expect("set");
        storage.set("k", b"second").expect("set");
        assert_eq!(storage.get("k").expect("get"), Some(b"second".to_vec()));
    }
}
