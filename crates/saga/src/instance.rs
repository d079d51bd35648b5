//! Saga instance state.

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::state::SagaStatus;
use crate::step::SagaContext;

/// Store key prefix for persisted saga instances.
pub const KEY_PREFIX: &str = "saga:";

/// A compensating action that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub step: String,
    pub error: String,
}

/// Outcome of a compensation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationReport {
    /// Steps whose compensating action succeeded, in the order they ran.
    pub compensated: Vec<String>,
    pub failed: Vec<CompensationFailure>,
    /// Completed steps that declare no compensating action.
    pub skipped: Vec<String>,
}

impl CompensationReport {
    /// Returns true if every compensating action that ran succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One execution of a saga definition.
///
/// Only the task driving the saga mutates an instance; everyone else sees
/// cloned snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub id: SagaId,
    pub saga_type: String,
    pub status: SagaStatus,
    /// Index of the next forward step to run.
    pub current_step: usize,
    pub context: SagaContext,
    /// Names of completed forward steps, in execution order.
    pub completed_steps: Vec<String>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub compensation: Option<CompensationReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    /// Creates a new instance in the `Started` status.
    pub fn new(id: SagaId, saga_type: impl Into<String>, context: SagaContext) -> Self {
        Self {
            id,
            saga_type: saga_type.into(),
            status: SagaStatus::Started,
            current_step: 0,
            context,
            completed_steps: Vec::new(),
            failed_step: None,
            error: None,
            compensation: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Returns the store key for a saga id.
    pub fn key_for(id: SagaId) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    /// Returns true once the saga reached `Completed` or `Compensated`.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merges a step's partial update into the context. Later writes win.
    pub(crate) fn merge(&mut self, update: SagaContext) {
        self.context.extend(update);
    }

    pub(crate) fn complete_step(&mut self, step: &str, update: SagaContext) {
        self.merge(update);
        self.completed_steps.push(step.to_string());
        self.current_step += 1;
    }

    pub(crate) fn fail_step(&mut self, step: &str, error: impl Into<String>) {
        self.status = SagaStatus::Failed;
        self.failed_step = Some(step.to_string());
        self.error = Some(error.into());
    }

    pub(crate) fn finish(&mut self, status: SagaStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn context(value: serde_json::Value) -> SagaContext {
        value.as_object().cloned().unwrap_or_else(Map::new)
    }

    #[test]
    fn test_new_instance() {
        let saga = SagaInstance::new(SagaId::new(), "order_processing", Map::new());
        assert_eq!(saga.status, SagaStatus::Started);
        assert_eq!(saga.current_step, 0);
        assert!(saga.completed_steps.is_empty());
        assert!(!saga.is_finished());
        assert!(SagaInstance::key_for(saga.id).starts_with(KEY_PREFIX));
    }

    #[test]
    fn test_complete_step_merges_last_writer_wins() {
        let mut saga = SagaInstance::new(
            SagaId::new(),
            "t",
            context(json!({"a": 1, "b": 1})),
        );

        saga.complete_step("first", context(json!({"b": 2, "c": 3})));

        assert_eq!(saga.context["a"], 1);
        assert_eq!(saga.context["b"], 2);
        assert_eq!(saga.context["c"], 3);
        assert_eq!(saga.completed_steps, vec!["first"]);
        assert_eq!(saga.current_step, 1);
    }

    #[test]
    fn test_fail_step_records_failure() {
        let mut saga = SagaInstance::new(SagaId::new(), "t", Map::new());
        saga.fail_step("pay", "declined");

        assert_eq!(saga.status, SagaStatus::Failed);
        assert_eq!(saga.failed_step.as_deref(), Some("pay"));
        assert_eq!(saga.error.as_deref(), Some("declined"));
        assert_eq!(saga.current_step, 0);
    }

    #[test]
    fn test_compensation_report_is_clean() {
        let mut report = CompensationReport::default();
        assert!(report.is_clean());
        report.failed.push(CompensationFailure {
            step: "reserve".into(),
            error: "timeout".into(),
        });
        assert!(!report.is_clean());
    }
}
