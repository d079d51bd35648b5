//! Event broker trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, HandlerError};

/// A message as handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Stable id used by consumers for deduplication.
    pub message_id: String,
    pub topic: String,
    /// Partition/ordering key (the aggregate id).
    pub key: String,
    pub event_type: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

/// Broker acknowledgement of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: String,
}

/// Consumer of broker messages.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one delivered message.
    async fn handle(&self, message: &BrokerMessage) -> Result<(), HandlerError>;
}

/// Trait for message broker operations.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Publishes a message; `Ok` means the broker took responsibility for it.
    async fn publish(&self, message: BrokerMessage) -> Result<Ack, BrokerError>;

    /// Registers a handler for every message on `topic`.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>)
    -> Result<(), BrokerError>;
}

#[async_trait]
impl<T: EventBroker + ?Sized> EventBroker for Arc<T> {
    async fn publish(&self, message: BrokerMessage) -> Result<Ack, BrokerError> {
        (**self).publish(message).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError> {
        (**self).subscribe(topic, handler).await
    }
}

#[derive(Default)]
struct InMemoryBrokerState {
    subscribers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    published: Vec<BrokerMessage>,
    fail_on_publish: bool,
    fail_next: u32,
    failing_keys: HashSet<String>,
}

/// In-process broker delivering to local subscribers.
///
/// Useful for tests and single-process deployments. Failure toggles let tests
/// simulate an unavailable broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<InMemoryBrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new in-memory broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish fail until reset.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// Makes the next `n` publishes fail.
    pub fn fail_next(&self, n: u32) {
        self.state.write().unwrap().fail_next = n;
    }

    /// Makes publishes keyed by `key` fail until [`heal_key`](Self::heal_key).
    pub fn fail_key(&self, key: impl Into<String>) {
        self.state.write().unwrap().failing_keys.insert(key.into());
    }

    /// Clears a failure set by [`fail_key`](Self::fail_key).
    pub fn heal_key(&self, key: &str) {
        self.state.write().unwrap().failing_keys.remove(key);
    }

    /// Returns every acknowledged message in publish order.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.state.read().unwrap().published.clone()
    }

    /// Returns the number of acknowledged messages.
    pub fn published_count(&self) -> usize {
        self.state.read().unwrap().published.len()
    }
}

#[async_trait]
impl EventBroker for InMemoryBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<Ack, BrokerError> {
        let handlers = {
            let mut state = self.state.write().unwrap();

            if state.fail_on_publish {
                return Err(BrokerError::Unavailable("broker offline".to_string()));
            }
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(BrokerError::Unavailable("transient failure".to_string()));
            }
            if state.failing_keys.contains(&message.key) {
                return Err(BrokerError::Rejected {
                    topic: message.topic.clone(),
                    reason: format!("partition for key {} unavailable", message.key),
                });
            }

            state.published.push(message.clone());
            state
                .subscribers
                .get(&message.topic)
                .cloned()
                .unwrap_or_default()
        };

        // Subscriber failures are the consumer's concern; the message was accepted.
        for handler in handlers {
            if let Err(e) = handler.handle(&message).await {
                tracing::warn!(topic = %message.topic, message_id = %message.message_id, error = %e, "subscriber failed");
            }
        }

        Ok(Ack {
            message_id: message.message_id,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BrokerError> {
        self.state
            .write()
            .unwrap()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        tracing::debug!(topic, "subscribed handler");
        Ok(())
    }
}
