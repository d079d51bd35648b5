//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{AppContext, Config};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn test_config() -> Config {
    Config {
        cb_failure_threshold: 2,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
        ..Config::default()
    }
}

async fn setup_with_context() -> (axum::Router, Arc<AppContext>) {
    let ctx = AppContext::in_memory(test_config()).await.unwrap();
    let app = api::create_app(ctx.clone(), get_metrics_handle());
    (app, ctx)
}

async fn setup() -> axum::Router {
    setup_with_context().await.0
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pending_outbox_records"], 0);
}

#[tokio::test]
async fn test_circuit_breaker_opens_and_rejects() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/process-with-circuit-breaker",
        Some(json!({"value": 21})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], 42);
    assert_eq!(json["circuit_breaker"]["state"], "CLOSED");

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            "POST",
            "/process-with-circuit-breaker",
            Some(json!({"value": -1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    // Open now: even a valid value is rejected without calling through.
    let (status, json) = send(
        &app,
        "POST",
        "/process-with-circuit-breaker",
        Some(json!({"value": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].as_str().unwrap().contains("external-service"));

    // Other dependencies have their own breaker.
    let (status, _) = send(
        &app,
        "POST",
        "/process-with-circuit-breaker",
        Some(json!({"value": 1, "service": "inventory"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, "GET", "/circuit-breakers", None).await;
    assert_eq!(status, StatusCode::OK);
    let breakers = json.as_array().unwrap();
    assert_eq!(breakers.len(), 2);
    assert_eq!(breakers[0]["name"], "external-service");
    assert_eq!(breakers[0]["state"], "OPEN");
    assert_eq!(breakers[1]["name"], "inventory");
    assert_eq!(breakers[1]["state"], "CLOSED");

    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["open_circuit_breakers"], json!(["external-service"]));
}

#[tokio::test]
async fn test_retry_recovers_and_exhausts() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/process-with-retry",
        Some(json!({"value": 5, "fail_times": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], 10);
    assert_eq!(json["attempts"], 3);

    let (status, json) = send(
        &app,
        "POST",
        "/process-with-retry",
        Some(json!({"value": 5, "fail_times": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("All 3 attempts failed"));
}

#[tokio::test]
async fn test_order_saga_completes() {
    let app = setup().await;

    let (status, saga) = send(
        &app,
        "POST",
        "/process-with-saga",
        Some(json!({"order_id": "o-1", "item_id": "sku-1", "amount": 25.0})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saga["status"], "COMPLETED");
    assert_eq!(saga["completed_steps"], json!(["validate", "reserve", "pay"]));
    assert_eq!(saga["context"]["payment_processed"], true);

    let id = saga["id"].as_str().unwrap();
    let (status, fetched) = send(&app, "GET", &format!("/saga/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, saga);

    // Finished sagas are served from the store, not held in memory.
    let (_, health) = send(&app, "GET", "/health", None).await;
    assert_eq!(health["sagas_in_flight"], 0);
}

#[tokio::test]
async fn test_order_saga_compensates_and_emits_event() {
    let (app, ctx) = setup_with_context().await;

    let (status, saga) = send(
        &app,
        "POST",
        "/transaction/saga",
        Some(json!({"context": {"order_id": "o-2", "amount": -5}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saga["status"], "COMPENSATED");
    assert_eq!(saga["completed_steps"], json!(["validate", "reserve"]));
    assert_eq!(saga["failed_step"], "pay");
    assert_eq!(saga["context"]["payment_processed"], false);

    // The terminal event waits in the outbox until the publisher runs.
    assert_eq!(ctx.outbox.pending_count().await.unwrap(), 1);
    ctx.publisher.flush_once().await.unwrap();
    let published = ctx.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "SagaCompensated");

    let (status, list) = send(&app, "GET", "/sagas", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_saga_errors() {
    let app = setup().await;

    let (status, _) = send(
        &app,
        "POST",
        "/transaction/saga",
        Some(json!({"saga_type": "unknown", "context": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/saga/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "GET",
        "/saga/00000000-0000-0000-0000-000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let saga_id = "6f1c1b7e-52a4-4c1e-9d55-3b8a2f0e4c11";
    let body = json!({"saga_id": saga_id, "context": {"order_id": "o-3", "amount": 1}});
    let (status, _) = send(&app, "POST", "/transaction/saga", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, "POST", "/transaction/saga", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_two_phase_commit() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/transaction/2pc",
        Some(json!({"payload": {"order_id": "o-1"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["committed"], true);
    assert_eq!(json["transaction"]["status"], "COMMITTED");
    assert_eq!(
        json["transaction"]["participants"].as_array().unwrap().len(),
        3
    );

    // An unregistered participant cannot prepare, so everything aborts.
    let (status, json) = send(
        &app,
        "POST",
        "/transaction/2pc",
        Some(json!({"participants": ["database", "ledger"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["committed"], false);
    assert_eq!(json["transaction"]["status"], "ABORTED");

    let (status, _) = send(
        &app,
        "POST",
        "/transaction/2pc",
        Some(json!({"participants": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_outbox_records_and_flushes() {
    let (app, ctx) = setup_with_context().await;

    let (status, json) = send(
        &app,
        "POST",
        "/transaction/outbox",
        Some(json!({"aggregate_id": "order-1", "event_type": "OrderCreated", "payload": {"total": 10}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["pending"], 1);
    assert!(json.get("flushed").is_none());

    let (status, json) = send(
        &app,
        "POST",
        "/transaction/outbox",
        Some(json!({"aggregate_id": "order-1", "event_type": "OrderPaid", "flush": true})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["flushed"]["published"], 2);
    assert_eq!(json["pending"], 0);

    let topics: Vec<_> = ctx.broker.published().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, vec!["OrderCreated", "OrderPaid"]);

    let (status, _) = send(
        &app,
        "POST",
        "/transaction/outbox",
        Some(json!({"aggregate_id": "", "event_type": "OrderCreated"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;

    send(&app, "POST", "/process-with-saga", Some(json!({"order_id": "o-9", "amount": 3}))).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_executions_total"));
}
