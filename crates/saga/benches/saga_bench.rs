use common::SagaId;
use criterion::{Criterion, criterion_group, criterion_main};
use saga::{SagaContext, SagaOrchestrator, order_processing};
use serde_json::json;

fn order_context(amount: i64) -> SagaContext {
    SagaContext::from_iter([
        ("order_id".to_string(), json!("order-1")),
        ("item_id".to_string(), json!("sku-1")),
        ("amount".to_string(), json!(amount)),
    ])
}

fn bench_completed_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = SagaOrchestrator::new();
    rt.block_on(orchestrator.register(order_processing::definition()))
        .unwrap();

    c.bench_function("saga/order_processing_completed", |b| {
        b.iter(|| {
            rt.block_on(async {
                orchestrator
                    .start(SagaId::new(), order_processing::SAGA_TYPE, order_context(10))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_compensated_saga(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = SagaOrchestrator::new();
    rt.block_on(orchestrator.register(order_processing::definition()))
        .unwrap();

    c.bench_function("saga/order_processing_compensated", |b| {
        b.iter(|| {
            rt.block_on(async {
                orchestrator
                    .start(SagaId::new(), order_processing::SAGA_TYPE, order_context(-5))
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_completed_saga, bench_compensated_saga);
criterion_main!(benches);
