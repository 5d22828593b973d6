use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::app_dirs::AppDirs;
use crate::error::StoreError;

/// Read-modify-write step applied atomically to one document. Returning
/// `None` leaves the stored document as it was.
pub type Transaction<'a> = dyn FnMut(Option<&Value>) -> Option<Value> + 'a;

/// Opaque key-value document store. Documents are JSON values addressed by
/// `(collection, key)`.
pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Runs `f` against the current document and stores its result, all
    /// under one lock or transaction. Returns the stored document.
    fn transact(
        &self,
        collection: &str,
        key: &str,
        f: &mut Transaction<'_>,
    ) -> Result<Option<Value>, StoreError>;

    /// Every document of a collection, ordered by key.
    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError>;

    fn set(&self, collection: &str, key: &str, doc: &Value) -> Result<(), StoreError> {
        self.transact(collection, key, &mut |_| Some(doc.clone()))?;
        Ok(())
    }

    /// Merges top-level fields into an existing document.
    fn update(&self, collection: &str, key: &str, fields: &Value) -> Result<(), StoreError> {
        let mut missing = false;
        self.transact(collection, key, &mut |current| match current {
            Some(current) => Some(merge(current, fields)),
            None => {
                missing = true;
                None
            }
        })?;
        if missing {
            return Err(StoreError::Missing {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Stores `doc` only if nothing exists at the key. Returns whether it was
    /// written.
    fn create(&self, collection: &str, key: &str, doc: &Value) -> Result<bool, StoreError> {
        let mut created = false;
        self.transact(collection, key, &mut |current| match current {
            Some(_) => None,
            None => {
                created = true;
                Some(doc.clone())
            }
        })?;
        Ok(created)
    }
}

fn merge(current: &Value, fields: &Value) -> Value {
    match (current, fields) {
        (Value::Object(current), Value::Object(fields)) => {
            let mut merged: Map<String, Value> = current.clone();
            for (k, v) in fields {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, fields) => fields.clone(),
    }
}

/// Store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> MutexGuard<'_, BTreeMap<(String, String), Value>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .docs()
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    fn transact(
        &self,
        collection: &str,
        key: &str,
        f: &mut Transaction<'_>,
    ) -> Result<Option<Value>, StoreError> {
        let mut docs = self.docs();
        let id = (collection.to_string(), key.to_string());
        match f(docs.get(&id)) {
            Some(next) => {
                docs.insert(id, next.clone());
                Ok(Some(next))
            }
            None => Ok(docs.get(&id).cloned()),
        }
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .docs()
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Durable local store backed by SQLite.
#[derive(Debug)]
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Opens the store at the platform state directory.
    pub fn open_default() -> Result<Self, StoreError> {
        match AppDirs::db_path() {
            Some(path) => Self::open(path),
            None => Self::open("key_crusher.db"),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            )
            "#,
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_body(conn: &Connection, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
            params![collection, key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(body.map(|b| serde_json::from_str::<Value>(&b)).transpose()?)
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        read_body(&self.conn(), collection, key)
    }

    fn transact(
        &self,
        collection: &str,
        key: &str,
        f: &mut Transaction<'_>,
    ) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = read_body(&tx, collection, key)?;

        let stored = match f(current.as_ref()) {
            Some(next) => {
                tx.execute(
                    r#"
                    INSERT INTO documents (collection, key, body, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT (collection, key)
                    DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
                    "#,
                    params![
                        collection,
                        key,
                        serde_json::to_string(&next)?,
                        Local::now().to_rfc3339(),
                    ],
                )?;
                Some(next)
            }
            None => current,
        };
        tx.commit()?;
        Ok(stored)
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT key, body FROM documents WHERE collection = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (key, body) = row?;
            docs.push((key, serde_json::from_str(&body)?));
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tempfile::tempdir;

    fn exercise(store: &dyn DocumentStore) {
        assert_eq!(store.get("c", "k").unwrap(), None);

        store.set("c", "k", &json!({"a": 1, "b": 2})).unwrap();
        store.update("c", "k", &json!({"b": 3})).unwrap();
        assert_eq!(store.get("c", "k").unwrap(), Some(json!({"a": 1, "b": 3})));

        assert!(!store.create("c", "k", &json!({"a": 9})).unwrap());
        assert!(store.create("c", "k2", &json!({"z": true})).unwrap());

        assert_matches!(
            store.update("c", "absent", &json!({"x": 1})),
            Err(StoreError::Missing { .. })
        );
        assert_eq!(store.get("c", "absent").unwrap(), None);

        store.set("other", "k", &json!(1)).unwrap();
        let keys: Vec<String> = store.list("c").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["k", "k2"]);
    }

    #[test]
    fn memory_store_semantics() {
        exercise(&MemoryDocumentStore::new());
    }

    #[test]
    fn sqlite_store_semantics() {
        exercise(&SqliteDocumentStore::open_in_memory().unwrap());
    }

    #[test]
    fn sqlite_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("docs.db");

        {
            let store = SqliteDocumentStore::open(&path).unwrap();
            store.set("c", "k", &json!({"kept": true})).unwrap();
        }

        let store = SqliteDocumentStore::open(&path).unwrap();
        assert_eq!(store.get("c", "k").unwrap(), Some(json!({"kept": true})));
    }

    #[test]
    fn transact_sees_current_document() {
        let store = SqliteDocumentStore::open_in_memory().unwrap();
        store.set("n", "counter", &json!(1)).unwrap();

        let stored = store
            .transact("n", "counter", &mut |current| {
                current.and_then(Value::as_i64).map(|n| json!(n + 1))
            })
            .unwrap();

        assert_eq!(stored, Some(json!(2)));
    }
}
