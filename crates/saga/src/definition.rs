//! Saga definitions.

use std::collections::HashSet;

use crate::error::{Result, SagaError};
use crate::step::SagaStep;

/// A named, ordered sequence of steps.
///
/// Definitions are immutable once registered and shared by every instance
/// of their saga type.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    saga_type: String,
    steps: Vec<SagaStep>,
}

impl SagaDefinition {
    /// Creates an empty definition.
    pub fn new(saga_type: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// Looks up a step by name.
    pub fn find_step(&self, name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Checks that the definition has steps and that step names are unique.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(SagaError::EmptyDefinition(self.saga_type.clone()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(SagaError::DuplicateStep {
                    saga_type: self.saga_type.clone(),
                    step: step.name().to_string(),
                });
            }
        }

        Ok(())
    }
}
