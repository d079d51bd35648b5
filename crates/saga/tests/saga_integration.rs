//! Integration tests for the saga orchestrator.

use std::sync::Arc;

use common::SagaId;
use outbox::{InMemoryBroker, Outbox, OutboxPublisher, PublisherConfig};
use saga::{
    SagaContext, SagaDefinition, SagaError, SagaEvent, SagaOrchestrator, SagaStatus, SagaStep,
    StepError, StepResult, order_processing,
};
use serde_json::{Value, json};
use store::{InMemoryKvStore, KvStore};

fn context(value: Value) -> SagaContext {
    value.as_object().cloned().unwrap_or_default()
}

async fn validate(_context: SagaContext) -> StepResult {
    Ok(SagaContext::from_iter([
        ("validated".to_string(), json!(true)),
        ("payment_processed".to_string(), json!(false)),
    ]))
}

async fn reserve(_context: SagaContext) -> StepResult {
    Ok(SagaContext::from_iter([("reserved".to_string(), json!(true))]))
}

async fn release(_context: SagaContext) -> StepResult {
    Ok(SagaContext::from_iter([("reserved".to_string(), json!(false))]))
}

async fn pay(context: SagaContext) -> StepResult {
    match context.get("amount").and_then(Value::as_f64) {
        Some(amount) if amount > 0.0 => Ok(SagaContext::from_iter([(
            "payment_processed".to_string(),
            json!(true),
        )])),
        _ => Err(StepError::from("Invalid payment amount")),
    }
}

fn order_definition() -> SagaDefinition {
    SagaDefinition::new("Order")
        .step(SagaStep::new("validate", validate))
        .step(SagaStep::new("reserve", reserve).with_compensation(release))
        .step(SagaStep::new("pay", pay))
}

#[tokio::test]
async fn test_negative_amount_is_compensated() {
    let orchestrator = SagaOrchestrator::new();
    orchestrator.register(order_definition()).await.unwrap();

    let saga = orchestrator
        .start(SagaId::new(), "Order", context(json!({"amount": -5})))
        .await
        .unwrap();

    assert_eq!(saga.status, SagaStatus::Compensated);
    assert_eq!(saga.completed_steps, vec!["validate", "reserve"]);
    assert_eq!(saga.context["payment_processed"], false);
    assert_eq!(saga.context["reserved"], false);
    assert_eq!(saga.failed_step.as_deref(), Some("pay"));
}

#[tokio::test]
async fn test_built_in_order_processing() {
    let orchestrator = SagaOrchestrator::new();
    orchestrator
        .register(order_processing::definition())
        .await
        .unwrap();

    let ok = orchestrator
        .start(
            SagaId::new(),
            order_processing::SAGA_TYPE,
            context(json!({"order_id": "o-1", "item_id": "sku-1", "quantity": 2, "amount": 99.5})),
        )
        .await
        .unwrap();
    assert_eq!(ok.status, SagaStatus::Completed);
    assert_eq!(ok.completed_steps, vec!["validate", "reserve", "pay"]);
    assert_eq!(ok.context["payment_processed"], true);
    assert_eq!(ok.context["reserved_inventory"]["quantity"], 2);

    let failed = orchestrator
        .start(
            SagaId::new(),
            order_processing::SAGA_TYPE,
            context(json!({"order_id": "o-2", "amount": 0})),
        )
        .await
        .unwrap();
    assert_eq!(failed.status, SagaStatus::Compensated);
    assert_eq!(failed.context["validated"], false);
    assert_eq!(failed.context["payment_processed"], false);
    assert!(failed.context["reserved_inventory"].is_null());

    let no_order = orchestrator
        .start(SagaId::new(), order_processing::SAGA_TYPE, SagaContext::new())
        .await
        .unwrap();
    assert_eq!(no_order.status, SagaStatus::Compensated);
    assert!(no_order.completed_steps.is_empty());

    assert_eq!(orchestrator.list().await.unwrap().len(), 3);
    assert_eq!(orchestrator.in_flight().await, 0);
}

#[tokio::test]
async fn test_snapshots_survive_in_store() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let orchestrator = SagaOrchestrator::new().with_store(store.clone());
    orchestrator.register(order_definition()).await.unwrap();

    let id = SagaId::new();
    let saga = orchestrator
        .start(id, "Order", context(json!({"amount": 10})))
        .await
        .unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);

    // A fresh orchestrator over the same store still knows the saga.
    let restarted = SagaOrchestrator::new().with_store(store);
    restarted.register(order_definition()).await.unwrap();
    assert_eq!(restarted.status(id).await.unwrap(), saga);
    assert_eq!(restarted.list().await.unwrap(), vec![saga.clone()]);
    assert!(matches!(
        restarted.start(id, "Order", SagaContext::new()).await,
        Err(SagaError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_terminal_events_flow_through_outbox() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let outbox = Outbox::new(store.clone());
    let broker = InMemoryBroker::new();
    let publisher = OutboxPublisher::new(outbox.clone(), broker.clone(), PublisherConfig::default());

    let orchestrator = SagaOrchestrator::new().with_outbox(outbox.clone());
    orchestrator.register(order_definition()).await.unwrap();

    let completed = orchestrator
        .start(SagaId::new(), "Order", context(json!({"amount": 10})))
        .await
        .unwrap();
    let compensated = orchestrator
        .start(SagaId::new(), "Order", context(json!({"amount": -1})))
        .await
        .unwrap();

    assert_eq!(outbox.pending_count().await.unwrap(), 2);
    publisher.flush_once().await.unwrap();

    let messages = broker.published();
    assert_eq!(messages.len(), 2);

    let completed_msg = messages
        .iter()
        .find(|m| m.key == completed.id.to_string())
        .unwrap();
    assert_eq!(completed_msg.topic, "SagaCompleted");
    let event: SagaEvent = serde_json::from_value(completed_msg.payload.clone()).unwrap();
    assert_eq!(event.saga_id(), completed.id);

    let compensated_msg = messages
        .iter()
        .find(|m| m.key == compensated.id.to_string())
        .unwrap();
    assert_eq!(compensated_msg.topic, "SagaCompensated");
    assert_eq!(compensated_msg.payload["data"]["failed_step"], "pay");
}

#[tokio::test]
async fn test_concurrent_sagas_are_isolated() {
    let orchestrator = Arc::new(SagaOrchestrator::new());
    orchestrator.register(order_definition()).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..20 {
        let amount = if n % 2 == 0 { 10 } else { -10 };
        handles.push(
            orchestrator
                .spawn(SagaId::new(), "Order", context(json!({ "amount": amount })))
                .await
                .unwrap(),
        );
    }

    let mut completed = 0;
    let mut compensated = 0;
    for handle in handles {
        match handle.await.unwrap().status {
            SagaStatus::Completed => completed += 1,
            SagaStatus::Compensated => compensated += 1,
            other => panic!("unexpected terminal status {other}"),
        }
    }

    assert_eq!(completed, 10);
    assert_eq!(compensated, 10);
    assert_eq!(orchestrator.list().await.unwrap().len(), 20);
}
