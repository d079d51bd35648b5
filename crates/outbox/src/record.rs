//! Outbox record.

use chrono::{DateTime, Utc};
use common::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::BrokerMessage;

/// Prefix of records still waiting for delivery. Scans read only these.
pub const PENDING_PREFIX: &str = "outbox:pending:";

/// Prefix of delivered records kept until their retention expires.
pub const PROCESSED_PREFIX: &str = "outbox:processed:";

/// A domain event waiting to be, or already, forwarded to the broker.
///
/// Created once by [`Outbox::record`](crate::Outbox::record); afterwards only
/// the publisher touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: RecordId,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    /// Tie-breaker for records created within the same timestamp.
    pub sequence: u64,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl OutboxRecord {
    /// Creates a new unprocessed record.
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        sequence: u64,
    ) -> Self {
        Self {
            id: RecordId::new(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
            sequence,
            processed: false,
            processed_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Returns the store key of a pending record.
    pub fn pending_key(id: RecordId) -> String {
        format!("{PENDING_PREFIX}{id}")
    }

    /// Returns the store key of a processed record.
    pub fn processed_key(id: RecordId) -> String {
        format!("{PROCESSED_PREFIX}{id}")
    }

    /// Returns this record's store key, which depends on whether it has been
    /// processed.
    pub fn key(&self) -> String {
        if self.processed {
            Self::processed_key(self.id)
        } else {
            Self::pending_key(self.id)
        }
    }

    /// Builds the broker message for this record.
    ///
    /// Topic is the event type; the partition key is the aggregate id so a
    /// broker that orders per key keeps one aggregate's events in order.
    pub fn to_message(&self) -> BrokerMessage {
        BrokerMessage {
            message_id: self.id.to_string(),
            topic: self.event_type.clone(),
            key: self.aggregate_id.clone(),
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            occurred_at: self.created_at,
        }
    }

    pub(crate) fn mark_processed(&mut self) {
        self.processed = true;
        self.processed_at = Some(Utc::now());
        self.last_error = None;
    }

    pub(crate) fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
    }
}
