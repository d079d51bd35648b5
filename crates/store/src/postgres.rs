use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::{KvStore, Result, StoreError};

/// PostgreSQL-backed key-value store.
///
/// Entries live in the `kv_entries` table. Expired rows are filtered out on
/// read and can be reclaimed with [`purge_expired`](Self::purge_expired).
#[derive(Clone)]
pub struct PostgresKvStore {
    pool: PgPool,
}

impl PostgresKvStore {
    /// Creates a new PostgreSQL key-value store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url` and returns a store over a new pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("kv store migrations applied");
        Ok(())
    }

    /// Deletes rows whose TTL has elapsed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
                .execute(&self.pool)
                .await?;
        tracing::debug!(purged = result.rows_affected(), "purged expired kv entries");
        Ok(result.rows_affected())
    }

    async fn upsert(
        &self,
        key: &str,
        value: Value,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value,
                          expires_at = EXCLUDED.expires_at,
                          updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for PostgresKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM kv_entries
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get::<Value, _>("value"))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.upsert(key, value, None).await
    }

    async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let ttl_chrono = chrono::Duration::from_std(ttl).map_err(|_| StoreError::InvalidTtl(ttl))?;
        let expires_at = Utc::now()
            .checked_add_signed(ttl_chrono)
            .ok_or(StoreError::InvalidTtl(ttl))?;
        self.upsert(key, value, Some(expires_at)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM kv_entries WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let rows = sqlx::query(
            r#"
            SELECT key, value FROM kv_entries
            WHERE left(key, char_length($1)) = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY key ASC
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Ok((row.try_get("key")?, row.try_get("value")?)))
            .collect()
    }
}
