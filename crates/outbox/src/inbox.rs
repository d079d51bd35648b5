//! Idempotent receipt of broker messages.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use store::KvStore;

use crate::broker::{BrokerMessage, EventHandler};
use crate::error::{HandlerError, OutboxError};
use crate::Result;

/// Store key prefix for processed message ids.
pub const KEY_PREFIX: &str = "inbox:";

/// Result of offering a message to the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    /// The handler ran and the id was recorded.
    Processed,
    /// The id was seen before; the handler did not run.
    AlreadyProcessed,
    /// Another task is handling the same id right now.
    InFlight,
}

/// Records which message ids a consumer has already handled.
///
/// An id is recorded only after its handler succeeds, so a failed handler is
/// retried on redelivery.
#[derive(Clone)]
pub struct Inbox<S: KvStore> {
    store: S,
    ttl: Option<Duration>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<S: KvStore> Inbox<S> {
    /// Creates an inbox whose records never expire.
    pub fn new(store: S) -> Self {
        Self {
            store,
            ttl: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Expires recorded ids after `ttl`.
    ///
    /// Redeliveries older than `ttl` are no longer recognized as duplicates.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn key(message_id: &str) -> String {
        format!("{KEY_PREFIX}{message_id}")
    }

    /// Checks whether `message_id` has been handled.
    pub async fn already_processed(&self, message_id: &str) -> Result<bool> {
        Ok(self.store.get(&Self::key(message_id)).await?.is_some())
    }

    /// Returns how many ids are currently recorded.
    pub async fn processed_count(&self) -> Result<usize> {
        Ok(self.store.scan_prefix(KEY_PREFIX).await?.len())
    }

    /// Runs `handler` unless `message_id` was already handled.
    #[tracing::instrument(skip(self, handler))]
    pub async fn handle<F, Fut>(&self, message_id: &str, handler: F) -> Result<InboxOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(), HandlerError>>,
    {
        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, message_id) else {
            tracing::debug!("message already in flight");
            return Ok(InboxOutcome::InFlight);
        };

        if self.already_processed(message_id).await? {
            tracing::debug!("duplicate message skipped");
            metrics::counter!("inbox_duplicates_total").increment(1);
            return Ok(InboxOutcome::AlreadyProcessed);
        }

        handler()
            .await
            .map_err(|e| OutboxError::Handler(e.to_string()))?;

        let marker = json!({ "processed_at": Utc::now() });
        let key = Self::key(message_id);
        match self.ttl {
            Some(ttl) => self.store.set_with_ttl(&key, marker, ttl).await?,
            None => self.store.set(&key, marker).await?,
        }

        Ok(InboxOutcome::Processed)
    }
}

/// Holds a message id in the in-flight set until dropped.
struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlightClaim<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Option<Self> {
        if !set.lock().insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Wraps an [`EventHandler`] so each message id is handled at most once.
pub struct IdempotentHandler<S: KvStore> {
    inbox: Inbox<S>,
    inner: Arc<dyn EventHandler>,
}

impl<S: KvStore> IdempotentHandler<S> {
    pub fn new(inbox: Inbox<S>, inner: Arc<dyn EventHandler>) -> Self {
        Self { inbox, inner }
    }
}

#[async_trait]
impl<S: KvStore> EventHandler for IdempotentHandler<S> {
    async fn handle(&self, message: &BrokerMessage) -> std::result::Result<(), HandlerError> {
        match self
            .inbox
            .handle(&message.message_id, || self.inner.handle(message))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => Err(HandlerError(e.to_string())),
        }
    }
}
