//! Two-phase commit.
//!
//! A [`TransactionCoordinator`] drives registered [`ResourceManager`]s through
//! a prepare phase and, only if every participant votes yes, a commit phase.
//! Any failed vote aborts the transaction on every participant.

pub mod coordinator;
pub mod error;
pub mod resource_manager;
pub mod transaction;

pub use coordinator::{CoordinatorConfig, TransactionCoordinator};
pub use error::{ParticipantError, Result, TwoPcError};
pub use resource_manager::{InMemoryResourceManager, ResourceManager};
pub use transaction::{Participant, ParticipantStatus, Transaction, TransactionStatus};
