//! Built-in order processing saga: validate, reserve inventory, take payment.

use serde_json::{Value, json};

use crate::definition::SagaDefinition;
use crate::error::StepError;
use crate::step::{SagaContext, SagaStep, StepResult, update};

/// The saga type identifier for order processing.
pub const SAGA_TYPE: &str = "order_processing";

/// Step name: Validate the order.
pub const STEP_VALIDATE: &str = "validate";

/// Step name: Reserve inventory for the order.
pub const STEP_RESERVE: &str = "reserve";

/// Step name: Take payment for the order.
pub const STEP_PAY: &str = "pay";

/// Returns the order processing definition.
pub fn definition() -> SagaDefinition {
    SagaDefinition::new(SAGA_TYPE)
        .step(SagaStep::new(STEP_VALIDATE, validate).with_compensation(undo_validate))
        .step(SagaStep::new(STEP_RESERVE, reserve).with_compensation(release))
        .step(SagaStep::new(STEP_PAY, pay).with_compensation(refund))
}

async fn validate(context: SagaContext) -> StepResult {
    let has_order_id = match context.get("order_id") {
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    if !has_order_id {
        return Err(StepError::from("Order ID is required"));
    }

    Ok(update([
        ("validated", json!(true)),
        ("payment_processed", json!(false)),
    ]))
}

async fn undo_validate(_context: SagaContext) -> StepResult {
    Ok(update([("validated", json!(false))]))
}

async fn reserve(context: SagaContext) -> StepResult {
    let item_id = context.get("item_id").cloned().unwrap_or(Value::Null);
    let quantity = context.get("quantity").cloned().unwrap_or(json!(1));

    Ok(update([(
        "reserved_inventory",
        json!({ "item_id": item_id, "quantity": quantity }),
    )]))
}

async fn release(context: SagaContext) -> StepResult {
    if let Some(reserved) = context.get("reserved_inventory").filter(|v| !v.is_null()) {
        tracing::info!(%reserved, "released inventory");
    }
    Ok(update([("reserved_inventory", Value::Null)]))
}

async fn pay(context: SagaContext) -> StepResult {
    let amount = context.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
    if amount <= 0.0 {
        return Err(StepError::from("Invalid payment amount"));
    }

    Ok(update([
        ("payment_processed", json!(true)),
        ("transaction_id", json!(format!("txn-{}", uuid::Uuid::new_v4()))),
    ]))
}

async fn refund(context: SagaContext) -> StepResult {
    if context.get("payment_processed") == Some(&Value::Bool(true)) {
        tracing::info!(transaction_id = ?context.get("transaction_id"), "refunded payment");
    }
    Ok(update([
        ("payment_processed", json!(false)),
        ("transaction_id", Value::Null),
    ]))
}
