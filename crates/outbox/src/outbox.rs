use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::RecordId;
use serde::Serialize;
use serde_json::Value;
use store::{KvStore, KvStoreExt};

use crate::Result;
use crate::record::{OutboxRecord, PENDING_PREFIX};

/// Write side of the outbox.
///
/// Clones share the store and the sequence counter.
#[derive(Clone)]
pub struct Outbox<S: KvStore> {
    store: S,
    sequence: Arc<AtomicU64>,
}

impl<S: KvStore> Outbox<S> {
    /// Creates an outbox over the given store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records an event for later publication.
    ///
    /// This is a single store write. The caller places it inside the same
    /// unit of work as the state change the event describes.
    #[tracing::instrument(skip(self, payload))]
    pub async fn record(
        &self,
        aggregate_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<RecordId> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let record = OutboxRecord::new(aggregate_id, event_type, payload, sequence);

        self.store.set_json(&record.key(), &record).await?;

        metrics::counter!("outbox_records_total", "event_type" => event_type.to_string())
            .increment(1);
        tracing::debug!(record_id = %record.id, "outbox record stored");

        Ok(record.id)
    }

    /// Records a serializable event.
    pub async fn record_event<E: Serialize + Sync>(
        &self,
        aggregate_id: &str,
        event_type: &str,
        event: &E,
    ) -> Result<RecordId> {
        let payload = serde_json::to_value(event)?;
        self.record(aggregate_id, event_type, payload).await
    }

    /// Loads a record by id, pending or processed.
    pub async fn get(&self, id: RecordId) -> Result<Option<OutboxRecord>> {
        if let Some(record) = self.store.get_json(&OutboxRecord::pending_key(id)).await? {
            return Ok(Some(record));
        }
        Ok(self.store.get_json(&OutboxRecord::processed_key(id)).await?)
    }

    /// Returns up to `limit` unprocessed records, oldest first.
    ///
    /// Only pending keys are read; processed records awaiting expiry are not
    /// scanned.
    pub async fn unprocessed(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let mut records: Vec<OutboxRecord> = self
            .store
            .scan_json::<OutboxRecord>(PENDING_PREFIX)
            .await?;

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        records.truncate(limit);
        Ok(records)
    }

    /// Returns the number of unprocessed records.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.store.scan_prefix(PENDING_PREFIX).await?.len())
    }

    /// Persists a record after a failed delivery attempt.
    pub async fn save(&self, record: &OutboxRecord) -> Result<()> {
        Ok(self.store.set_json(&record.key(), record).await?)
    }

    /// Marks a record processed and lets it expire after `retention`.
    ///
    /// The processed copy is written before the pending key is removed, so a
    /// failure in between leads to a redelivery rather than a loss.
    pub async fn mark_processed(
        &self,
        record: &mut OutboxRecord,
        retention: Duration,
    ) -> Result<()> {
        record.mark_processed();
        self.store
            .set_json_with_ttl(&record.key(), record, retention)
            .await?;
        self.store
            .delete(&OutboxRecord::pending_key(record.id))
            .await?;
        Ok(())
    }
}
