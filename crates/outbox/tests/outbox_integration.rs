//! End-to-end outbox tests: record, publish, consume idempotently.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use outbox::{
    BrokerMessage, EventBroker, EventHandler, HandlerError, IdempotentHandler, Inbox,
    InMemoryBroker, Outbox, OutboxPublisher, PublisherConfig,
};
use serde_json::json;
use store::InMemoryKvStore;

#[derive(Default)]
struct CountingConsumer {
    seen: AtomicUsize,
}

#[async_trait]
impl EventHandler for CountingConsumer {
    async fn handle(&self, _message: &BrokerMessage) -> Result<(), HandlerError> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn consumer_on(
    broker: &InMemoryBroker,
    topic: &str,
) -> Arc<CountingConsumer> {
    let consumer = Arc::new(CountingConsumer::default());
    let inbox = Inbox::new(InMemoryKvStore::new());
    broker
        .subscribe(topic, Arc::new(IdempotentHandler::new(inbox, consumer.clone())))
        .await
        .unwrap();
    consumer
}

#[tokio::test]
async fn recorded_event_reaches_consumer_exactly_once() {
    let store = InMemoryKvStore::new();
    let broker = InMemoryBroker::new();
    let consumer = consumer_on(&broker, "order_created").await;

    let outbox = Outbox::new(store.clone());
    let publisher = OutboxPublisher::new(outbox.clone(), broker.clone(), PublisherConfig::default());

    let id = outbox
        .record("order-1", "order_created", json!({"order_id": "order-1"}))
        .await
        .unwrap();

    publisher.flush_once().await.unwrap();
    publisher.flush_once().await.unwrap();

    assert_eq!(broker.published_count(), 1);
    assert_eq!(consumer.seen.load(Ordering::SeqCst), 1);
    assert!(outbox.get(id).await.unwrap().unwrap().processed);
}

#[tokio::test]
async fn redelivered_message_is_deduplicated_by_inbox() {
    let broker = InMemoryBroker::new();
    let consumer = consumer_on(&broker, "order_created").await;
    let outbox = Outbox::new(InMemoryKvStore::new());

    let id = outbox
        .record("order-1", "order_created", json!({}))
        .await
        .unwrap();
    let record = outbox.get(id).await.unwrap().unwrap();

    // Publish acknowledged but never marked processed: the next scan resends.
    broker.publish(record.to_message()).await.unwrap();
    let publisher = OutboxPublisher::new(outbox.clone(), broker.clone(), PublisherConfig::default());
    publisher.flush_once().await.unwrap();

    assert_eq!(broker.published_count(), 2);
    assert_eq!(consumer.seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broker_outage_delays_but_does_not_lose_events() {
    let broker = InMemoryBroker::new();
    let outbox = Outbox::new(InMemoryKvStore::new());
    let publisher = Arc::new(OutboxPublisher::new(
        outbox.clone(),
        broker.clone(),
        PublisherConfig {
            flush_interval: Duration::from_millis(10),
            ..Default::default()
        },
    ));

    broker.set_fail_on_publish(true);
    for n in 0..3 {
        outbox
            .record("order-1", "order_updated", json!({ "n": n }))
            .await
            .unwrap();
    }

    let handle = publisher.clone().spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.published_count(), 0);
    assert_eq!(outbox.pending_count().await.unwrap(), 3);

    broker.set_fail_on_publish(false);
    for _ in 0..100 {
        if outbox.pending_count().await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    let order: Vec<_> = broker
        .published()
        .iter()
        .map(|m| m.payload["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![0, 1, 2]);
}
