//! Shared application context.

use std::sync::Arc;

use outbox::{InMemoryBroker, Outbox, OutboxPublisher};
use resilience::{CircuitBreakerRegistry, RetryPolicy};
use saga::{SagaOrchestrator, order_processing};
use store::{InMemoryKvStore, KvStore};
use twopc::{InMemoryResourceManager, TransactionCoordinator};

use crate::config::Config;

/// Resource managers enlisted in every `/transaction/2pc` request that does
/// not name its own participants.
pub const DEFAULT_RESOURCE_MANAGERS: [&str; 3] = ["database", "cache", "file-system"];

/// Publisher over the shared store and the in-process broker.
pub type Publisher = OutboxPublisher<Arc<dyn KvStore>, InMemoryBroker>;

/// Everything the handlers share, built once at startup.
pub struct AppContext {
    pub config: Config,
    pub breakers: CircuitBreakerRegistry,
    pub retry: RetryPolicy,
    pub store: Arc<dyn KvStore>,
    pub orchestrator: Arc<SagaOrchestrator>,
    pub coordinator: Arc<TransactionCoordinator>,
    pub outbox: Outbox<Arc<dyn KvStore>>,
    pub broker: InMemoryBroker,
    pub publisher: Arc<Publisher>,
}

impl AppContext {
    /// Builds the context over `store`.
    ///
    /// Registers the built-in `order_processing` saga and one in-memory
    /// resource manager per entry of [`DEFAULT_RESOURCE_MANAGERS`].
    pub async fn new(config: Config, store: Arc<dyn KvStore>) -> saga::Result<Arc<Self>> {
        let outbox = Outbox::new(store.clone());
        let broker = InMemoryBroker::new();
        let publisher = Arc::new(OutboxPublisher::new(
            outbox.clone(),
            broker.clone(),
            config.publisher(),
        ));

        let mut orchestrator = SagaOrchestrator::new()
            .with_store(store.clone())
            .with_outbox(outbox.clone());
        if let Some(retention) = config.saga_retention {
            orchestrator = orchestrator.with_retention(retention);
        }
        orchestrator.register(order_processing::definition()).await?;

        let coordinator = TransactionCoordinator::new("api-coordinator", config.coordinator());
        for id in DEFAULT_RESOURCE_MANAGERS {
            coordinator
                .register(Arc::new(InMemoryResourceManager::new(id)))
                .await;
        }

        Ok(Arc::new(Self {
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker()),
            retry: config.retry_policy(),
            config,
            store,
            orchestrator: Arc::new(orchestrator),
            coordinator: Arc::new(coordinator),
            outbox,
            broker,
            publisher,
        }))
    }

    /// Builds a context over a fresh in-memory store.
    pub async fn in_memory(config: Config) -> saga::Result<Arc<Self>> {
        Self::new(config, Arc::new(InMemoryKvStore::new())).await
    }
}
