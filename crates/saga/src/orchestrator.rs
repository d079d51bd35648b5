//! Saga orchestrator for driving registered saga definitions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::SagaId;
use outbox::Outbox;
use store::{InMemoryKvStore, KvStore, KvStoreExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::definition::SagaDefinition;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::instance::{CompensationFailure, CompensationReport, KEY_PREFIX, SagaInstance};
use crate::state::SagaStatus;
use crate::step::SagaContext;

/// Runs sagas: forward steps in order, and on failure the compensating
/// actions of completed steps in reverse order.
///
/// Each instance is driven by exactly one task. After every transition a
/// snapshot is published to the in-flight map and written to the store, so
/// readers never see a half-applied step. Once a saga finishes it lives only
/// in the store.
///
/// Store and outbox failures after a saga has started are logged and
/// counted but never interrupt it: a saga always runs to `Completed` or
/// `Compensated`.
pub struct SagaOrchestrator {
    definitions: RwLock<HashMap<String, Arc<SagaDefinition>>>,
    in_flight: RwLock<HashMap<SagaId, SagaInstance>>,
    store: Arc<dyn KvStore>,
    retention: Option<Duration>,
    outbox: Option<Outbox<Arc<dyn KvStore>>>,
}

impl Default for SagaOrchestrator {
    fn default() -> Self {
        Self {
            definitions: RwLock::default(),
            in_flight: RwLock::default(),
            store: Arc::new(InMemoryKvStore::new()),
            retention: None,
            outbox: None,
        }
    }
}

impl SagaOrchestrator {
    /// Creates an orchestrator over a private in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists every instance snapshot under `saga:{id}` in `store`.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = store;
        self
    }

    /// Expires finished sagas from the store after `ttl`.
    pub fn with_retention(mut self, ttl: Duration) -> Self {
        self.retention = Some(ttl);
        self
    }

    /// Emits `SagaCompleted` / `SagaCompensated` events through the outbox.
    pub fn with_outbox(mut self, outbox: Outbox<Arc<dyn KvStore>>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Registers a saga definition.
    pub async fn register(&self, definition: SagaDefinition) -> Result<()> {
        definition.validate()?;

        let mut definitions = self.definitions.write().await;
        let saga_type = definition.saga_type().to_string();
        if definitions.contains_key(&saga_type) {
            return Err(SagaError::DuplicateSagaType(saga_type));
        }

        tracing::info!(%saga_type, steps = definition.len(), "registered saga definition");
        definitions.insert(saga_type, Arc::new(definition));
        Ok(())
    }

    /// Returns the registered saga types, sorted.
    pub async fn saga_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.definitions.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Starts a saga and drives it to a terminal status.
    ///
    /// Returns the final snapshot. A failing step is not an error: the
    /// returned instance is `Compensated` and records what failed. Errors
    /// only come from creating the saga.
    #[tracing::instrument(skip(self, context))]
    pub async fn start(
        &self,
        id: SagaId,
        saga_type: &str,
        context: SagaContext,
    ) -> Result<SagaInstance> {
        let (definition, instance) = self.create(id, saga_type, context).await?;
        Ok(self.drive(&definition, instance).await)
    }

    /// Starts a saga on a background task.
    ///
    /// The instance exists (status `Started`) when this returns, so `status`
    /// can be polled while the task runs.
    pub async fn spawn(
        self: &Arc<Self>,
        id: SagaId,
        saga_type: &str,
        context: SagaContext,
    ) -> Result<JoinHandle<SagaInstance>> {
        let (definition, instance) = self.create(id, saga_type, context).await?;
        let orchestrator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            orchestrator.drive(&definition, instance).await
        }))
    }

    /// Returns a snapshot of the saga, in flight or finished.
    pub async fn status(&self, id: SagaId) -> Result<SagaInstance> {
        if let Some(instance) = self.in_flight.read().await.get(&id) {
            return Ok(instance.clone());
        }
        self.store
            .get_json::<SagaInstance>(&SagaInstance::key_for(id))
            .await?
            .ok_or(SagaError::NotFound(id))
    }

    /// Returns snapshots of all known sagas, oldest first.
    ///
    /// In-flight snapshots take precedence over stored ones.
    pub async fn list(&self) -> Result<Vec<SagaInstance>> {
        let stored = self.store.scan_json::<SagaInstance>(KEY_PREFIX).await?;
        let mut sagas: HashMap<SagaId, SagaInstance> =
            stored.into_iter().map(|saga| (saga.id, saga)).collect();
        for (id, saga) in self.in_flight.read().await.iter() {
            sagas.insert(*id, saga.clone());
        }

        let mut sagas: Vec<_> = sagas.into_values().collect();
        sagas.sort_by_key(|s| s.started_at);
        Ok(sagas)
    }

    /// Number of sagas currently being driven.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.read().await.len()
    }

    async fn create(
        &self,
        id: SagaId,
        saga_type: &str,
        context: SagaContext,
    ) -> Result<(Arc<SagaDefinition>, SagaInstance)> {
        let definition = self
            .definitions
            .read()
            .await
            .get(saga_type)
            .cloned()
            .ok_or_else(|| SagaError::UnknownSagaType(saga_type.to_string()))?;

        let instance = SagaInstance::new(id, saga_type, context);
        let key = SagaInstance::key_for(id);
        {
            let mut in_flight = self.in_flight.write().await;
            if in_flight.contains_key(&id) || self.store.contains(&key).await? {
                return Err(SagaError::AlreadyExists(id));
            }
            in_flight.insert(id, instance.clone());
        }

        // Nothing has run yet, so a saga that cannot be recorded is dropped.
        if let Err(e) = self.store.set_json(&key, &instance).await {
            self.in_flight.write().await.remove(&id);
            return Err(e.into());
        }

        metrics::counter!("saga_executions_total", "saga_type" => saga_type.to_string())
            .increment(1);
        tracing::info!(saga_id = %id, %saga_type, "saga started");
        Ok((definition, instance))
    }

    #[tracing::instrument(skip_all, fields(saga_id = %instance.id, saga_type = %instance.saga_type))]
    async fn drive(&self, definition: &SagaDefinition, mut instance: SagaInstance) -> SagaInstance {
        let saga_start = std::time::Instant::now();

        instance.status = SagaStatus::InProgress;
        self.publish(&instance).await;

        while instance.status.can_run()
            && let Some(step) = definition.steps().get(instance.current_step)
        {
            tracing::debug!(step = step.name(), "saga step started");

            match step.run(instance.context.clone()).await {
                Ok(update) => {
                    instance.complete_step(step.name(), update);
                    self.publish(&instance).await;
                    tracing::debug!(step = step.name(), "saga step completed");
                }
                Err(e) => {
                    tracing::warn!(step = step.name(), error = %e, "saga step failed");
                    instance.fail_step(step.name(), e.to_string());
                    self.publish(&instance).await;
                }
            }
        }

        if instance.status.can_compensate() {
            self.compensate(definition, &mut instance).await;
            metrics::histogram!("saga_duration_seconds")
                .record(saga_start.elapsed().as_secs_f64());
            return instance;
        }

        instance.finish(SagaStatus::Completed);
        self.conclude(&instance).await;
        self.emit(SagaEvent::completed(&instance)).await;

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(duration, "saga completed successfully");

        instance
    }

    /// Runs compensating actions in reverse order of completed steps.
    ///
    /// A failing compensation is recorded and logged; the sweep continues.
    async fn compensate(&self, definition: &SagaDefinition, instance: &mut SagaInstance) {
        instance.status = SagaStatus::Compensating;
        self.publish(instance).await;

        let mut report = CompensationReport::default();
        let completed: Vec<String> = instance.completed_steps.clone();

        for name in completed.iter().rev() {
            let Some(step) = definition.find_step(name) else {
                continue;
            };

            match step.compensate(instance.context.clone()).await {
                None => report.skipped.push(name.clone()),
                Some(Ok(update)) => {
                    instance.merge(update);
                    report.compensated.push(name.clone());
                    tracing::info!(step = %name, "compensated step");
                }
                Some(Err(e)) => {
                    tracing::error!(step = %name, error = %e, "compensation failed");
                    report.failed.push(CompensationFailure {
                        step: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        instance.compensation = Some(report);
        instance.finish(SagaStatus::Compensated);
        self.conclude(instance).await;
        self.emit(SagaEvent::compensated(instance)).await;

        metrics::counter!("saga_compensated").increment(1);
        tracing::info!(
            failed_step = instance.failed_step.as_deref().unwrap_or("unknown"),
            "saga compensated"
        );
    }

    /// Publishes an intermediate snapshot to the in-flight map and the store.
    async fn publish(&self, instance: &SagaInstance) {
        self.in_flight
            .write()
            .await
            .insert(instance.id, instance.clone());
        let key = SagaInstance::key_for(instance.id);
        if let Err(e) = self.store.set_json(&key, instance).await {
            persistence_failed(instance, &e);
        }
    }

    /// Writes the terminal snapshot and retires the saga from memory.
    ///
    /// If the write fails the saga stays in the in-flight map so it remains
    /// visible.
    async fn conclude(&self, instance: &SagaInstance) {
        let key = SagaInstance::key_for(instance.id);
        let written = match self.retention {
            Some(ttl) => self.store.set_json_with_ttl(&key, instance, ttl).await,
            None => self.store.set_json(&key, instance).await,
        };

        let mut in_flight = self.in_flight.write().await;
        match written {
            Ok(()) => {
                in_flight.remove(&instance.id);
            }
            Err(e) => {
                persistence_failed(instance, &e);
                in_flight.insert(instance.id, instance.clone());
            }
        }
    }

    async fn emit(&self, event: SagaEvent) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        if let Err(e) = outbox
            .record_event(&event.saga_id().to_string(), event.event_type(), &event)
            .await
        {
            metrics::counter!("saga_event_failures_total").increment(1);
            tracing::error!(saga_id = %event.saga_id(), event_type = event.event_type(), error = %e, "failed to record saga event");
        }
    }
}

fn persistence_failed(instance: &SagaInstance, error: &store::StoreError) {
    metrics::counter!("saga_persistence_failures_total").increment(1);
    tracing::error!(saga_id = %instance.id, status = %instance.status, %error, "failed to persist saga snapshot");
}
