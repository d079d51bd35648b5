//! HTTP route handlers.

pub mod resilience;
pub mod sagas;
pub mod system;
pub mod transactions;
