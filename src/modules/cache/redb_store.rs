//! Persistent cache on an embedded `redb` database.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CacheError, CacheStore};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_entries");

/// Stored form of a value.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at: Option<DateTime<Utc>>,
    value: Value,
}

impl Envelope {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Cache store backed by a single redb file.
///
/// Every transaction runs on the blocking pool.
#[derive(Clone)]
pub struct RedbCacheStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCacheStore").finish_non_exhaustive()
    }
}

impl RedbCacheStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db = Database::create(path.as_ref()).map_err(backend)?;

        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(ENTRIES).map_err(backend)?;
        txn.commit().map_err(backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, CacheError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|err| CacheError::Backend(format!("cache task failed: {err}")))?
    }
}

#[async_trait]
impl CacheStore for RedbCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let key = key.to_string();
        let envelope = self
            .blocking({
                let key = key.clone();
                move |db| read_envelope(db, &key)
            })
            .await?;

        match envelope {
            Some(envelope) if envelope.is_expired(Utc::now()) => {
                log::debug!("cache entry {} expired", key);
                self.delete(&key).await?;
                Ok(None)
            }
            Some(envelope) => Ok(Some(envelope.value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = TimeDelta::from_std(ttl)
                    .map_err(|err| CacheError::Serialization(err.to_string()))?;
                Some(Utc::now() + ttl)
            }
            None => None,
        };
        let bytes = serde_json::to_vec(&Envelope { expires_at, value })
            .map_err(|err| CacheError::Serialization(err.to_string()))?;
        let key = key.to_string();

        self.blocking(move |db| {
            let txn = db.begin_write().map_err(backend)?;
            {
                let mut table = txn.open_table(ENTRIES).map_err(backend)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(backend)?;
            }
            txn.commit().map_err(backend)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = key.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(backend)?;
            {
                let mut table = txn.open_table(ENTRIES).map_err(backend)?;
                table.remove(key.as_str()).map_err(backend)?;
            }
            txn.commit().map_err(backend)
        })
        .await
    }
}

fn read_envelope(db: &Database, key: &str) -> Result<Option<Envelope>, CacheError> {
    let txn = db.begin_read().map_err(backend)?;
    let table = txn.open_table(ENTRIES).map_err(backend)?;
    let Some(raw) = table.get(key).map_err(backend)? else {
        return Ok(None);
    };
    serde_json::from_slice(raw.value())
        .map(Some)
        .map_err(|err| CacheError::Serialization(err.to_string()))
}

fn backend(err: impl std::fmt::Display) -> CacheError {
    CacheError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");

        {
            let store = RedbCacheStore::open(&path).unwrap();
            store
                .set("douban:subject:1", json!("<h1>page</h1>"), Some(Duration::from_secs(60)))
                .await
                .unwrap();
        }

        let store = RedbCacheStore::open(&path).unwrap();
        assert_eq!(
            store.get("douban:subject:1").await.unwrap(),
            Some(json!("<h1>page</h1>"))
        );
        assert_eq!(store.get("douban:subject:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbCacheStore::open(dir.path().join("cache.redb")).unwrap();

        store
            .set("gone", json!({"status": 404}), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(store.get("gone").await.unwrap(), None);

        store.set("kept", json!(1), None).await.unwrap();
        assert_eq!(store.get("kept").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbCacheStore::open(dir.path().join("cache.redb")).unwrap();
        store.set("k", json!("v"), None).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("never-set").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
