//! Saga pattern implementation.
//!
//! A saga is a named sequence of steps, each with an optional compensating
//! action. The [`SagaOrchestrator`] runs the steps in order; if one fails, it
//! runs the compensating actions of the completed steps in reverse order.
//!
//! The built-in [`order_processing`] saga follows these steps:
//! 1. Validate the order
//! 2. Reserve inventory
//! 3. Take payment
//!
//! Sagas reaching a terminal state emit a [`SagaEvent`] through the outbox
//! when one is attached.

pub mod definition;
pub mod error;
pub mod events;
pub mod instance;
pub mod order_processing;
pub mod orchestrator;
pub mod state;
pub mod step;

pub use definition::SagaDefinition;
pub use error::{Result, SagaError, StepError};
pub use events::SagaEvent;
pub use instance::{CompensationFailure, CompensationReport, SagaInstance};
pub use orchestrator::SagaOrchestrator;
pub use state::SagaStatus;
pub use step::{SagaContext, SagaStep, StepAction, StepResult};
