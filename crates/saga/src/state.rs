//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Started ──► InProgress ──┬──► Completed
///                          └──► Failed ──► Compensating ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Saga was created but no step has run yet.
    #[default]
    Started,

    /// Forward steps are being executed.
    InProgress,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A forward step failed; compensation follows.
    Failed,

    /// Compensating actions are running in reverse order.
    Compensating,

    /// Compensation finished after a failure (terminal state).
    Compensated,
}

impl SagaStatus {
    /// Returns true if forward steps may run.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaStatus::Started | SagaStatus::InProgress)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Failed)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::InProgress => "IN_PROGRESS",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
