//! Transaction coordinator.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use common::TransactionId;
use futures_util::future::join_all;
use resilience::with_timeout;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::TwoPcError;
use crate::resource_manager::ResourceManager;
use crate::transaction::{ParticipantStatus, Transaction, TransactionStatus};
use crate::Result;

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound on each participant call.
    pub transaction_timeout: Duration,
    /// Extra attempts for a participant whose commit fails.
    pub commit_retries: u32,
    /// Number of finished transactions kept for lookup. The oldest are
    /// dropped first.
    pub archive_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: Duration::from_secs(30),
            commit_retries: 0,
            archive_capacity: 1000,
        }
    }
}

/// Outcome of one participant call.
enum Vote {
    Yes,
    No(String),
}

/// A transaction that has not reached a terminal status yet.
struct LiveTransaction {
    tx: Transaction,
    /// Held for the whole of a prepare, commit or abort so phases on the
    /// same transaction never interleave.
    phase: Arc<Mutex<()>>,
}

/// Bounded store of committed and aborted transactions.
#[derive(Default)]
struct Archive {
    transactions: HashMap<TransactionId, Transaction>,
    order: VecDeque<TransactionId>,
}

impl Archive {
    fn insert(&mut self, tx: Transaction, capacity: usize) {
        self.order.push_back(tx.id);
        self.transactions.insert(tx.id, tx);
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.transactions.remove(&evicted);
                tracing::debug!(transaction_id = %evicted, "evicted finished transaction");
            }
        }
    }
}

/// Drives two-phase commits across registered resource managers.
///
/// Phase 2 is not atomic: if a commit still fails after `commit_retries`,
/// the transaction is aborted on every participant, including those that
/// already committed.
///
/// Once a transaction commits or aborts it moves to a bounded archive and can
/// no longer change.
pub struct TransactionCoordinator {
    coordinator_id: String,
    config: CoordinatorConfig,
    managers: RwLock<HashMap<String, Arc<dyn ResourceManager>>>,
    // Lock order: `live` before `archive`.
    live: RwLock<HashMap<TransactionId, LiveTransaction>>,
    archive: RwLock<Archive>,
}

impl TransactionCoordinator {
    /// Creates a coordinator with no registered resource managers.
    pub fn new(coordinator_id: impl Into<String>, config: CoordinatorConfig) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            config,
            managers: RwLock::new(HashMap::new()),
            live: RwLock::new(HashMap::new()),
            archive: RwLock::new(Archive::default()),
        }
    }

    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Registers a resource manager under its id, replacing any previous one.
    pub async fn register(&self, manager: Arc<dyn ResourceManager>) {
        let id = manager.id().to_string();
        self.managers.write().await.insert(id.clone(), manager);
        tracing::info!(resource_manager = %id, "registered resource manager");
    }

    /// Returns the ids of all registered resource managers, sorted.
    pub async fn resource_managers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.managers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Starts a transaction over the given participants.
    ///
    /// Unregistered participants are accepted here and fail in the prepare
    /// phase.
    #[tracing::instrument(skip(self))]
    pub async fn begin(&self, participant_ids: &[String]) -> Result<TransactionId> {
        if participant_ids.is_empty() {
            return Err(TwoPcError::NoParticipants);
        }

        let tx = Transaction::new(&self.coordinator_id, participant_ids);
        let id = tx.id;
        self.live.write().await.insert(
            id,
            LiveTransaction {
                tx,
                phase: Arc::new(Mutex::new(())),
            },
        );

        metrics::counter!("twopc_transactions_total").increment(1);
        tracing::info!(transaction_id = %id, "transaction started");
        Ok(id)
    }

    /// Phase 1: asks every participant to prepare, in parallel.
    ///
    /// Returns false if any participant voted no, failed, timed out or has no
    /// registered resource manager; in that case the transaction has already
    /// been aborted on every participant. Also returns false if the
    /// transaction was no longer preparing, for example because a concurrent
    /// call prepared or aborted it first.
    #[tracing::instrument(skip(self, payload))]
    pub async fn prepare(&self, id: TransactionId, payload: &Value) -> Result<bool> {
        Ok(self.prepare_phase(id, payload).await?.0)
    }

    /// Phase 2: commits every participant of a prepared transaction.
    ///
    /// Returns false if the transaction was not prepared, or if a commit still
    /// failed after the configured retries (the transaction is then aborted).
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, id: TransactionId) -> Result<bool> {
        Ok(self.commit_phase(id).await?.0)
    }

    /// Aborts the transaction on every participant.
    ///
    /// Aborting an already aborted transaction is a no-op. An abort issued
    /// while another phase is running waits for that phase to finish.
    #[tracing::instrument(skip(self))]
    pub async fn abort(&self, id: TransactionId) -> Result<()> {
        let (_phase, tx) = self.lock_phase(id).await?;
        match tx.status {
            TransactionStatus::Committed => Err(TwoPcError::AlreadyCommitted(id)),
            TransactionStatus::Aborted => Ok(()),
            _ => self.abort_participants(&tx).await.map(|_| ()),
        }
    }

    /// Runs begin, prepare and commit. Returns true if the transaction committed.
    pub async fn run(&self, participant_ids: &[String], payload: &Value) -> Result<bool> {
        let tx = self.execute(participant_ids, payload).await?;
        Ok(tx.status == TransactionStatus::Committed)
    }

    /// Runs a full two-phase commit and returns the final transaction.
    #[tracing::instrument(skip(self, payload))]
    pub async fn execute(&self, participant_ids: &[String], payload: &Value) -> Result<Transaction> {
        let id = self.begin(participant_ids).await?;
        let (prepared, tx) = self.prepare_phase(id, payload).await?;
        if !prepared {
            return Ok(tx);
        }
        Ok(self.commit_phase(id).await?.1)
    }

    /// Returns a snapshot of the transaction, live or archived.
    pub async fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        let live = self.live.read().await;
        if let Some(entry) = live.get(&id) {
            return Ok(entry.tx.clone());
        }
        self.archive
            .read()
            .await
            .transactions
            .get(&id)
            .cloned()
            .ok_or(TwoPcError::TransactionNotFound(id))
    }

    /// Returns snapshots of all live and archived transactions, oldest first.
    pub async fn list(&self) -> Vec<Transaction> {
        let live = self.live.read().await;
        let archive = self.archive.read().await;
        let mut txs: Vec<_> = live
            .values()
            .map(|entry| entry.tx.clone())
            .chain(archive.transactions.values().cloned())
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        txs
    }

    async fn prepare_phase(&self, id: TransactionId, payload: &Value) -> Result<(bool, Transaction)> {
        let (_phase, tx) = self.lock_phase(id).await?;
        if tx.status != TransactionStatus::Preparing {
            tracing::warn!(status = ?tx.status, "prepare skipped, transaction not preparing");
            return Ok((false, tx));
        }

        let managers = self.managers_for(&tx).await;
        let timeout = self.config.transaction_timeout;

        let votes = join_all(tx.participants.iter().zip(managers).map(
            |(participant, manager)| async move {
                let Some(manager) = manager else {
                    return Vote::No(format!(
                        "resource manager '{}' not registered",
                        participant.resource_manager
                    ));
                };
                match with_timeout(timeout, manager.prepare(id, payload)).await {
                    Ok(Ok(true)) => Vote::Yes,
                    Ok(Ok(false)) => Vote::No("voted to abort".to_string()),
                    Ok(Err(e)) => Vote::No(e.to_string()),
                    Err(e) => Vote::No(format!("prepare: {e}")),
                }
            },
        ))
        .await;

        let tx = self
            .update(id, |tx| {
                for (participant, vote) in tx.participants.iter_mut().zip(votes) {
                    match vote {
                        Vote::Yes => participant.status = ParticipantStatus::Prepared,
                        Vote::No(reason) => {
                            tracing::warn!(participant = %participant.id, %reason, "participant failed to prepare");
                            participant.fail(reason);
                        }
                    }
                }
                if tx.all_prepared() {
                    tx.status = TransactionStatus::Prepared;
                }
                tx.clone()
            })
            .await?;

        if tx.status == TransactionStatus::Prepared {
            tracing::info!("all participants prepared");
            Ok((true, tx))
        } else {
            Ok((false, self.abort_participants(&tx).await?))
        }
    }

    async fn commit_phase(&self, id: TransactionId) -> Result<(bool, Transaction)> {
        let (_phase, tx) = self.lock_phase(id).await?;
        if tx.status != TransactionStatus::Prepared {
            tracing::warn!(status = ?tx.status, "commit skipped, transaction not prepared");
            return Ok((false, tx));
        }

        let managers = self.managers_for(&tx).await;
        let timeout = self.config.transaction_timeout;
        let attempts = self.config.commit_retries + 1;

        let results = join_all(tx.participants.iter().zip(managers).map(
            |(participant, manager)| async move {
                let Some(manager) = manager else {
                    return Vote::No(format!(
                        "resource manager '{}' not registered",
                        participant.resource_manager
                    ));
                };
                let mut last_error = String::new();
                for attempt in 1..=attempts {
                    match with_timeout(timeout, manager.commit(id)).await {
                        Ok(Ok(())) => return Vote::Yes,
                        Ok(Err(e)) => last_error = e.to_string(),
                        Err(e) => last_error = format!("commit: {e}"),
                    }
                    tracing::warn!(participant = %participant.id, attempt, error = %last_error, "commit attempt failed");
                }
                Vote::No(last_error)
            },
        ))
        .await;

        let tx = self
            .update(id, |tx| {
                for (participant, result) in tx.participants.iter_mut().zip(results) {
                    match result {
                        Vote::Yes => participant.status = ParticipantStatus::Committed,
                        Vote::No(reason) => participant.fail(reason),
                    }
                }
                if tx
                    .participants
                    .iter()
                    .all(|p| p.status == ParticipantStatus::Committed)
                {
                    tx.finish(TransactionStatus::Committed);
                }
                tx.clone()
            })
            .await?;

        if tx.status == TransactionStatus::Committed {
            metrics::counter!("twopc_committed").increment(1);
            tracing::info!("transaction committed");
            Ok((true, tx))
        } else {
            tracing::error!("transaction failed to commit");
            Ok((false, self.abort_participants(&tx).await?))
        }
    }

    /// Waits for exclusive use of a live transaction's phases and returns the
    /// guard with a fresh snapshot. Finished transactions need no guard.
    async fn lock_phase(&self, id: TransactionId) -> Result<(Option<OwnedMutexGuard<()>>, Transaction)> {
        let phase = self.live.read().await.get(&id).map(|entry| entry.phase.clone());
        let guard = match phase {
            Some(phase) => Some(phase.lock_owned().await),
            None => None,
        };
        let tx = self.transaction(id).await?;
        Ok((guard, tx))
    }

    async fn managers_for(&self, tx: &Transaction) -> Vec<Option<Arc<dyn ResourceManager>>> {
        let managers = self.managers.read().await;
        tx.participants
            .iter()
            .map(|p| managers.get(&p.resource_manager).cloned())
            .collect()
    }

    /// Applies `f` to a live transaction. A transaction that reaches a
    /// terminal status is moved to the archive before the lock is released;
    /// archived transactions are refused with [`TwoPcError::Finished`].
    async fn update<T>(&self, id: TransactionId, f: impl FnOnce(&mut Transaction) -> T) -> Result<T> {
        let mut live = self.live.write().await;
        let Some(entry) = live.get_mut(&id) else {
            let archive = self.archive.read().await;
            return Err(match archive.transactions.get(&id) {
                Some(tx) => TwoPcError::Finished {
                    id,
                    status: tx.status,
                },
                None => TwoPcError::TransactionNotFound(id),
            });
        };

        let out = f(&mut entry.tx);
        if entry.tx.status.is_terminal()
            && let Some(entry) = live.remove(&id)
        {
            self.archive
                .write()
                .await
                .insert(entry.tx, self.config.archive_capacity);
        }
        Ok(out)
    }

    /// Calls `abort` on every participant and marks the transaction aborted.
    /// The caller holds the phase guard.
    ///
    /// Participants that failed or committed keep their status so the
    /// outcome stays visible.
    async fn abort_participants(&self, tx: &Transaction) -> Result<Transaction> {
        let id = tx.id;
        let managers = self.managers_for(tx).await;
        let timeout = self.config.transaction_timeout;

        join_all(tx.participants.iter().zip(managers).filter_map(
            |(participant, manager)| {
                manager.map(|manager| async move {
                    match with_timeout(timeout, manager.abort(id)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!(participant = %participant.id, error = %e, "abort failed")
                        }
                        Err(e) => {
                            tracing::error!(participant = %participant.id, error = %e, "abort timed out")
                        }
                    }
                })
            },
        ))
        .await;

        let tx = self
            .update(id, |tx| {
                for participant in &mut tx.participants {
                    if matches!(
                        participant.status,
                        ParticipantStatus::Preparing | ParticipantStatus::Prepared
                    ) {
                        participant.status = ParticipantStatus::Aborted;
                    }
                }
                tx.finish(TransactionStatus::Aborted);
                tx.clone()
            })
            .await?;

        metrics::counter!("twopc_aborted").increment(1);
        tracing::info!(transaction_id = %id, "transaction aborted");
        Ok(tx)
    }
}
