//! Resilience policies for calls to unreliable collaborators.
//!
//! - [`CircuitBreaker`]: fails fast while a dependency is unhealthy
//! - [`CircuitBreakerRegistry`]: one breaker per dependency name
//! - [`RetryPolicy`]: exponential backoff retries
//! - [`with_timeout`]: bounds a future by a caller-supplied duration

pub mod circuit_breaker;
pub mod error;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use error::{CircuitBreakerError, RetryError, TimeoutError};
pub use registry::CircuitBreakerRegistry;
pub use retry::RetryPolicy;
pub use timeout::with_timeout;
