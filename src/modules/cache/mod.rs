//! Page and failure cache stores.
//!
//! Values are JSON. Failures of the store never fail a fetch: callers treat a
//! read error as a miss and log write errors.

pub mod redb_store;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::challenges::core::FetchError;

pub use redb_store::RedbCacheStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

impl From<CacheError> for FetchError {
    fn from(err: CacheError) -> Self {
        FetchError::Cache(err.to_string())
    }
}

/// Async key/value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// `ttl = None` keeps the entry until deleted.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Key of a cached page body.
pub fn page_key(prefix: &str, id: &str) -> String {
    format!("{prefix}:subject:{id}")
}

/// Key of a cached negative result.
pub fn failure_key(prefix: &str, id: &str) -> String {
    format!("{prefix}-details-fail-id={id}")
}

/// Writes between sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: usize = 256;

#[derive(Debug)]
struct MemoryEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Process-local store. Expired entries are evicted when read, and swept
/// from the whole map every few writes so unread keys do not pile up.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    writes: AtomicUsize,
    sweep_every: usize,
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            sweep_every: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, writes: usize) -> Self {
        self.sweep_every = writes.max(1);
        self
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        match self.entries.lock() {
            Ok(mut entries) => sweep(&mut entries),
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("memory cache lock poisoned".into()))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(Instant::now()),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.lock()?;
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_every == 0 {
            let removed = sweep(&mut entries);
            if removed > 0 {
                log::debug!("memory cache swept {} expired entries", removed);
            }
        }
        entries.insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

fn sweep(entries: &mut HashMap<String, MemoryEntry>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_helpers() {
        assert_eq!(page_key("douban", "1292052"), "douban:subject:1292052");
        assert_eq!(failure_key("douban", "1292052"), "douban-details-fail-id=1292052");
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryCacheStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", json!("<html>"), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("<html>")));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_expires_entries() {
        let store = MemoryCacheStore::new();
        store
            .set("k", json!({"status": 404}), Some(Duration::from_secs(1800)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(1799)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unread_expired_entries_are_swept_on_write() {
        let store = MemoryCacheStore::new().with_sweep_interval(4);
        let ttl = Some(Duration::from_secs(10));
        store.set("douban:subject:1", json!("a"), ttl).await.unwrap();
        store.set("douban:subject:2", json!("b"), ttl).await.unwrap();
        store.set("douban-details-fail-id=3", json!({"status": 404}), ttl).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.len(), 3);

        store.set("douban:subject:4", json!("d"), None).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("douban:subject:4").await.unwrap(), Some(json!("d")));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_keeps_live_entries() {
        let store = MemoryCacheStore::new();
        store.set("short", json!(1), Some(Duration::from_secs(1))).await.unwrap();
        store.set("long", json!(2), Some(Duration::from_secs(60))).await.unwrap();
        store.set("forever", json!(3), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("long").await.unwrap(), Some(json!(2)));
    }
}
