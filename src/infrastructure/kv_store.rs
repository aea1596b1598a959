use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChangeKind {
    Set,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChange {
    pub key: String,
    pub kind: KeyChangeKind,
}

/// Local key-value cache. Values are JSON documents; every write is
/// announced to subscribers after it has been applied.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, InfraError>;
    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), InfraError>;
    fn remove(&self, key: &str) -> Result<(), InfraError>;
    fn subscribe(&self) -> broadcast::Receiver<KeyChange>;
}

pub fn load_typed<K, T>(store: &K, key: &str) -> Result<Option<T>, InfraError>
where
    K: KeyValueStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub fn save_typed<K, T>(store: &K, key: &str, value: &T) -> Result<(), InfraError>
where
    K: KeyValueStore + ?Sized,
    T: Serialize,
{
    let encoded = serde_json::to_value(value)?;
    store.set(key, &encoded)
}

fn normalized_key(key: &str) -> Result<&str, InfraError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(InfraError::InvalidConfig(
            "key-value store key must not be empty".to_string(),
        ));
    }
    Ok(key)
}

fn announce(changes: &broadcast::Sender<KeyChange>, key: &str, kind: KeyChangeKind) {
    // No receivers is fine.
    let _ = changes.send(KeyChange {
        key: key.to_string(),
        kind,
    });
}

#[derive(Debug)]
pub struct SqliteKeyValueStore {
    db_path: PathBuf,
    changes: broadcast::Sender<KeyChange>,
}

impl SqliteKeyValueStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            changes,
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, InfraError> {
        let key = normalized_key(key)?;
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let parsed = serde_json::from_str(&raw).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid kv_store value for '{key}': {error}"))
        })?;
        Ok(Some(parsed))
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), InfraError> {
        let key = normalized_key(key)?;
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![key, serde_json::to_string(value)?, Utc::now().to_rfc3339()],
        )?;
        announce(&self.changes, key, KeyChangeKind::Set);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let key = normalized_key(key)?;
        let connection = self.connect()?;
        let removed = connection.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        if removed > 0 {
            announce(&self.changes, key, KeyChangeKind::Removed);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<KeyChange> {
        self.changes.subscribe()
    }
}

#[derive(Debug)]
pub struct InMemoryKeyValueStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
    changes: broadcast::Sender<KeyChange>,
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: Mutex::new(HashMap::new()),
            changes,
        }
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, InfraError> {
        let key = normalized_key(key)?;
        let values = self
            .values
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("kv store lock poisoned: {error}")))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), InfraError> {
        let key = normalized_key(key)?;
        {
            let mut values = self
                .values
                .lock()
                .map_err(|error| InfraError::InvalidConfig(format!("kv store lock poisoned: {error}")))?;
            values.insert(key.to_string(), value.clone());
        }
        announce(&self.changes, key, KeyChangeKind::Set);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), InfraError> {
        let key = normalized_key(key)?;
        let removed = {
            let mut values = self
                .values
                .lock()
                .map_err(|error| InfraError::InvalidConfig(format!("kv store lock poisoned: {error}")))?;
            values.remove(key).is_some()
        };
        if removed {
            announce(&self.changes, key, KeyChangeKind::Removed);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<KeyChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;

    fn sqlite_store() -> (tempfile::TempDir, SqliteKeyValueStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("timegrid.sqlite");
        initialize_database(&path).expect("init database");
        (dir, SqliteKeyValueStore::new(path))
    }

    #[test]
    fn sqlite_store_persists_across_instances() {
        let (dir, store) = sqlite_store();
        store
            .set("selected_project_id", &serde_json::json!("prj-1"))
            .expect("set value");

        let reopened = SqliteKeyValueStore::new(dir.path().join("timegrid.sqlite"));
        assert_eq!(
            reopened.get("selected_project_id").expect("get value"),
            Some(serde_json::json!("prj-1"))
        );
    }

    #[test]
    fn sqlite_store_overwrites_and_removes() {
        let (_dir, store) = sqlite_store();
        store.set("counter", &serde_json::json!(1)).expect("first set");
        store.set("counter", &serde_json::json!(2)).expect("second set");
        assert_eq!(store.get("counter").expect("get"), Some(serde_json::json!(2)));

        store.remove("counter").expect("remove");
        assert_eq!(store.get("counter").expect("get"), None);
    }

    #[test]
    fn empty_keys_are_rejected() {
        let store = InMemoryKeyValueStore::default();
        assert!(store.set("  ", &serde_json::json!(true)).is_err());
    }

    #[test]
    fn typed_helpers_round_trip_structs() {
        let store = InMemoryKeyValueStore::default();
        let value: HashMap<String, u32> = HashMap::from([("morning".to_string(), 350)]);
        save_typed(&store, "calories", &value).expect("save typed");
        let loaded: Option<HashMap<String, u32>> = load_typed(&store, "calories").expect("load typed");
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn subscribers_are_notified_of_changes() {
        let store = InMemoryKeyValueStore::default();
        let mut changes = store.subscribe();

        store.set("stopwatch", &serde_json::json!({})).expect("set");
        store.remove("stopwatch").expect("remove");
        store.remove("stopwatch").expect("second remove is silent");

        let first = changes.recv().await.expect("first change");
        assert_eq!(first.key, "stopwatch");
        assert_eq!(first.kind, KeyChangeKind::Set);
        let second = changes.recv().await.expect("second change");
        assert_eq!(second.kind, KeyChangeKind::Removed);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn sqlite_store_notifies_subscribers() {
        let (_dir, store) = sqlite_store();
        let mut changes = store.subscribe();
        store.set("projects", &serde_json::json!([])).expect("set");
        let change = changes.recv().await.expect("change");
        assert_eq!(change.key, "projects");
    }
}
