//! Resource manager trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::TransactionId;
use serde_json::Value;

use crate::error::ParticipantError;

/// A resource that can take part in a two-phase commit.
///
/// `prepare` must be idempotent for the same transaction, `commit` must fail
/// with [`ParticipantError::NotPrepared`] for a transaction it never prepared,
/// and `abort` must be safe to call in any state.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Identifier participants use to refer to this resource.
    fn id(&self) -> &str;

    /// Votes on the transaction. `Ok(false)` is a "no" vote.
    async fn prepare(&self, tx: TransactionId, data: &Value) -> Result<bool, ParticipantError>;

    /// Makes the prepared changes durable.
    async fn commit(&self, tx: TransactionId) -> Result<(), ParticipantError>;

    /// Discards any prepared changes.
    async fn abort(&self, tx: TransactionId) -> Result<(), ParticipantError>;
}

#[derive(Debug, Default)]
struct InMemoryResourceState {
    prepared: HashMap<TransactionId, Value>,
    committed: HashMap<TransactionId, Value>,
    vote_no: bool,
    fail_on_prepare: bool,
    fail_next_commits: u32,
    prepare_delay: Option<Duration>,
    prepare_calls: u32,
    commit_calls: u32,
    abort_calls: u32,
}

/// In-memory resource manager for testing and demos.
#[derive(Debug, Clone)]
pub struct InMemoryResourceManager {
    id: String,
    state: Arc<RwLock<InMemoryResourceState>>,
}

impl InMemoryResourceManager {
    /// Creates a new in-memory resource manager.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(RwLock::new(InMemoryResourceState::default())),
        }
    }

    /// Makes `prepare` vote no.
    pub fn set_vote_no(&self, vote_no: bool) {
        self.state.write().unwrap().vote_no = vote_no;
    }

    /// Makes `prepare` return an error.
    pub fn set_fail_on_prepare(&self, fail: bool) {
        self.state.write().unwrap().fail_on_prepare = fail;
    }

    /// Makes the next `n` commits fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.state.write().unwrap().fail_next_commits = n;
    }

    /// Delays every `prepare` call, for timeout tests.
    pub fn set_prepare_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().prepare_delay = delay;
    }

    /// Returns true if the transaction is prepared but not yet resolved.
    pub fn is_prepared(&self, tx: TransactionId) -> bool {
        self.state.read().unwrap().prepared.contains_key(&tx)
    }

    /// Returns true if the transaction was committed here.
    pub fn is_committed(&self, tx: TransactionId) -> bool {
        self.state.read().unwrap().committed.contains_key(&tx)
    }

    /// Returns the number of committed transactions.
    pub fn committed_count(&self) -> usize {
        self.state.read().unwrap().committed.len()
    }

    pub fn prepare_calls(&self) -> u32 {
        self.state.read().unwrap().prepare_calls
    }

    pub fn commit_calls(&self) -> u32 {
        self.state.read().unwrap().commit_calls
    }

    pub fn abort_calls(&self) -> u32 {
        self.state.read().unwrap().abort_calls
    }
}

#[async_trait]
impl ResourceManager for InMemoryResourceManager {
    fn id(&self) -> &str {
        &self.id
    }

    async fn prepare(&self, tx: TransactionId, data: &Value) -> Result<bool, ParticipantError> {
        let delay = {
            let mut state = self.state.write().unwrap();
            state.prepare_calls += 1;
            state.prepare_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        if state.fail_on_prepare {
            return Err(ParticipantError::Unavailable(format!(
                "{} cannot prepare",
                self.id
            )));
        }
        if state.vote_no {
            return Ok(false);
        }

        state.prepared.entry(tx).or_insert_with(|| data.clone());
        tracing::debug!(resource = %self.id, %tx, "prepared");
        Ok(true)
    }

    async fn commit(&self, tx: TransactionId) -> Result<(), ParticipantError> {
        let mut state = self.state.write().unwrap();
        state.commit_calls += 1;

        if state.fail_next_commits > 0 {
            state.fail_next_commits -= 1;
            return Err(ParticipantError::Unavailable(format!(
                "{} commit failed",
                self.id
            )));
        }

        let data = state
            .prepared
            .remove(&tx)
            .ok_or(ParticipantError::NotPrepared(tx))?;
        state.committed.insert(tx, data);
        tracing::debug!(resource = %self.id, %tx, "committed");
        Ok(())
    }

    async fn abort(&self, tx: TransactionId) -> Result<(), ParticipantError> {
        let mut state = self.state.write().unwrap();
        state.abort_calls += 1;
        state.prepared.remove(&tx);
        tracing::debug!(resource = %self.id, %tx, "aborted");
        Ok(())
    }
}
