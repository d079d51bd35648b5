use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::{KvStore, Result, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory key-value store.
///
/// Suitable for tests and non-durable deployments. Entries are kept in a
/// sorted map so prefix scans return keys in order. Expired entries are
/// invisible to reads and removed lazily by [`purge_expired`].
///
/// [`purge_expired`]: InMemoryKvStore::purge_expired
#[derive(Clone, Default)]
pub struct InMemoryKvStore {
    entries: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl InMemoryKvStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Returns true if the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes expired entries. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Clears all entries.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    async fn insert(&self, key: &str, value: Value, expires_at: Option<Instant>) {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.insert(key, value, None).await;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        self.insert(key, value, Some(expires_at)).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| e.is_live(now)))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let matches = entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(key, e)| (key.clone(), e.value.clone()))
            .collect();
        Ok(matches)
    }
}
