use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Result;

/// Core trait for key-value store implementations.
///
/// Every write is a single, store-local operation: either the whole value is
/// stored or nothing is. Callers that need "business state + outbox row"
/// atomicity rely on that guarantee plus their own transaction boundary.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, or None if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key` without expiry, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Stores `value` under `key`; the entry disappears once `ttl` elapses.
    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Deletes the entry under `key`. Returns true if an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Returns all live entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        (**self).set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        (**self).scan_prefix(prefix).await
    }
}

/// Extension trait providing typed JSON helpers for key-value stores.
#[async_trait]
pub trait KvStoreExt: KvStore {
    /// Loads and deserializes the value under `key`.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serializes and stores `value` under `key`.
    async fn set_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.set(key, serde_json::to_value(value)?).await
    }

    /// Serializes and stores `value` under `key` with an expiry.
    async fn set_json_with_ttl<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.set_with_ttl(key, serde_json::to_value(value)?, ttl)
            .await
    }

    /// Loads and deserializes every entry under `prefix`, ordered by key.
    async fn scan_json<T>(&self, prefix: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.scan_prefix(prefix)
            .await?
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(Into::into))
            .collect()
    }

    /// Checks whether a live entry exists under `key`.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

// Blanket implementation for all KvStore implementations
impl<T: KvStore + ?Sized> KvStoreExt for T {}
