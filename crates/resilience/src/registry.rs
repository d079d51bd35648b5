//! Breaker-per-dependency registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};

/// Owns one [`CircuitBreaker`] per dependency name.
///
/// Cloning the registry is cheap and shares the underlying breakers.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry whose breakers use `default_config`.
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: Arc::default(),
        }
    }

    /// Returns the breaker for `name`, creating it with the default config.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create(name, self.default_config)
    }

    /// Returns the breaker for `name`, creating it with `config` if absent.
    ///
    /// An existing breaker keeps the configuration it was created with.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }
        self.breakers
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(breaker = name, "registered circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    /// Returns stats for every registered breaker, ordered by name.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.breakers.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Returns the number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Returns true if no breaker has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::CircuitState;

    #[test]
    fn same_name_returns_same_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get("payments");
        let b = registry.get("payments");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn breakers_are_isolated_per_dependency() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        });

        let _ = registry
            .get("inventory")
            .execute(|| async { Err::<(), _>("down") })
            .await;

        assert_eq!(registry.get("inventory").state(), CircuitState::Open);
        assert_eq!(registry.get("shipping").state(), CircuitState::Closed);

        let names: Vec<_> = registry.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["inventory", "shipping"]);
    }

    #[test]
    fn existing_breaker_keeps_its_config() {
        let registry = CircuitBreakerRegistry::default();
        let custom = CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(5),
        };
        registry.get_or_create("node-service", custom);
        let again = registry.get("node-service");
        assert_eq!(again.config(), custom);
    }
}
