//! Transaction and participant records.

use chrono::{DateTime, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};

/// Global transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Preparing,
    Prepared,
    Committed,
    Aborted,
}

impl TransactionStatus {
    /// Returns true for `Committed` and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// Status of one participant within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Preparing,
    Prepared,
    Committed,
    Aborted,
    Failed,
}

/// A resource enlisted in a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    /// Id of the resource manager that serves this participant.
    pub resource_manager: String,
    pub status: ParticipantStatus,
    pub error: Option<String>,
}

impl Participant {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            resource_manager: id.clone(),
            id,
            status: ParticipantStatus::Preparing,
            error: None,
        }
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = ParticipantStatus::Failed;
        self.error = Some(error.into());
    }
}

/// A global transaction as tracked by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub coordinator_id: String,
    pub status: TransactionStatus,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub(crate) fn new(coordinator_id: &str, participant_ids: &[String]) -> Self {
        Self {
            id: TransactionId::new(),
            coordinator_id: coordinator_id.to_string(),
            status: TransactionStatus::Preparing,
            participants: participant_ids.iter().map(Participant::new).collect(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Returns the participant with the given id.
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Returns true once every participant has voted yes.
    pub fn all_prepared(&self) -> bool {
        self.participants
            .iter()
            .all(|p| p.status == ParticipantStatus::Prepared)
    }

    pub(crate) fn finish(&mut self, status: TransactionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
