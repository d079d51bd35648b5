//! Shared identifier types used across the coordination crates.

pub mod types;

pub use types::{RecordId, SagaId, TransactionId};
