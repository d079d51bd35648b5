//! Saga domain events emitted through the outbox.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::instance::SagaInstance;

/// Events emitted when a saga reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Every step completed.
    SagaCompleted(SagaCompletedData),

    /// A step failed and completed steps were compensated.
    SagaCompensated(SagaCompensatedData),
}

impl SagaEvent {
    /// Returns the event type name, used as the outbox event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaCompensated(_) => "SagaCompensated",
        }
    }

    /// Returns the saga the event belongs to.
    pub fn saga_id(&self) -> SagaId {
        match self {
            SagaEvent::SagaCompleted(data) => data.saga_id,
            SagaEvent::SagaCompensated(data) => data.saga_id,
        }
    }

    /// Creates a SagaCompleted event from a completed instance.
    pub fn completed(instance: &SagaInstance) -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            saga_id: instance.id,
            saga_type: instance.saga_type.clone(),
            completed_steps: instance.completed_steps.clone(),
            completed_at: instance.finished_at.unwrap_or_else(Utc::now),
        })
    }

    /// Creates a SagaCompensated event from a compensated instance.
    pub fn compensated(instance: &SagaInstance) -> Self {
        let report = instance.compensation.clone().unwrap_or_default();
        SagaEvent::SagaCompensated(SagaCompensatedData {
            saga_id: instance.id,
            saga_type: instance.saga_type.clone(),
            failed_step: instance.failed_step.clone(),
            error: instance.error.clone(),
            compensated_steps: report.compensated,
            failed_compensations: report.failed.into_iter().map(|f| f.step).collect(),
            compensated_at: instance.finished_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Data for SagaCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub saga_id: SagaId,
    pub saga_type: String,
    pub completed_steps: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Data for SagaCompensated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCompensatedData {
    pub saga_id: SagaId,
    pub saga_type: String,
    /// The forward step whose failure triggered compensation.
    pub failed_step: Option<String>,
    pub error: Option<String>,
    /// Steps whose compensating action succeeded, in execution order.
    pub compensated_steps: Vec<String>,
    /// Steps whose compensating action failed.
    pub failed_compensations: Vec<String>,
    pub compensated_at: DateTime<Utc>,
}
