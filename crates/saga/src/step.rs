//! Saga steps and their actions.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StepError;

/// Shared mutable data of a saga instance, passed from step to step.
pub type SagaContext = Map<String, Value>;

/// Result of a step action: a partial context update, or a failure.
pub type StepResult = Result<SagaContext, StepError>;

/// A forward action or compensating action.
///
/// The action receives a copy of the current context and returns the keys it
/// wants to change. Any async function or closure of the form
/// `Fn(SagaContext) -> impl Future<Output = StepResult>` is an action.
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn run(&self, context: SagaContext) -> StepResult;
}

#[async_trait]
impl<F, Fut> StepAction for F
where
    F: Fn(SagaContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send,
{
    async fn run(&self, context: SagaContext) -> StepResult {
        (self)(context).await
    }
}

/// A named step with an optional compensating action.
#[derive(Clone)]
pub struct SagaStep {
    name: String,
    action: Arc<dyn StepAction>,
    compensation: Option<Arc<dyn StepAction>>,
}

impl SagaStep {
    /// Creates a step without a compensating action.
    pub fn new(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            action: Arc::new(action),
            compensation: None,
        }
    }

    /// Attaches a compensating action.
    pub fn with_compensation(mut self, compensation: impl StepAction + 'static) -> Self {
        self.compensation = Some(Arc::new(compensation));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_compensation(&self) -> bool {
        self.compensation.is_some()
    }

    pub(crate) async fn run(&self, context: SagaContext) -> StepResult {
        self.action.run(context).await
    }

    /// Runs the compensating action, or returns None if the step has none.
    pub(crate) async fn compensate(&self, context: SagaContext) -> Option<StepResult> {
        match &self.compensation {
            Some(compensation) => Some(compensation.run(context).await),
            None => None,
        }
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("has_compensation", &self.has_compensation())
            .finish()
    }
}

/// Builds a context update from key/value pairs.
///
/// ```
/// use saga::step::update;
/// use serde_json::json;
///
/// let u = update([("validated", json!(true))]);
/// assert_eq!(u["validated"], true);
/// ```
pub fn update<const N: usize>(pairs: [(&str, Value); N]) -> SagaContext {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
