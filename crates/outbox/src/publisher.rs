//! Background publisher forwarding outbox records to the broker.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use store::KvStore;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::broker::EventBroker;
use crate::error::OutboxError;
use crate::outbox::Outbox;
use crate::Result;

/// Publisher tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Delay between scans.
    pub flush_interval: Duration,
    /// Maximum records published per scan.
    pub batch_size: usize,
    /// How long processed records stay in the store.
    pub processed_retention: Duration,
}

impl PublisherConfig {
    /// Shortest accepted delay between scans.
    pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

    /// Clamps values that would stop the publisher from ever delivering: a
    /// zero interval cannot drive a timer and a zero batch reads nothing.
    pub fn normalized(mut self) -> Self {
        if self.flush_interval < Self::MIN_FLUSH_INTERVAL {
            tracing::warn!(
                configured = ?self.flush_interval,
                "outbox flush interval too small, using minimum"
            );
            self.flush_interval = Self::MIN_FLUSH_INTERVAL;
        }
        if self.batch_size == 0 {
            tracing::warn!("outbox batch size of 0 would never publish, using 1");
            self.batch_size = 1;
        }
        self
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            batch_size: 100,
            processed_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Outcome of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub published: usize,
    pub failed: usize,
    /// Records skipped because an earlier record of the same aggregate failed.
    pub deferred: usize,
}

impl FlushReport {
    /// Returns true if the scan found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.published == 0 && self.failed == 0 && self.deferred == 0
    }
}

/// Forwards unprocessed outbox records to an [`EventBroker`].
///
/// Records are marked processed only after the broker acknowledges them, so a
/// crash between publish and mark results in a duplicate, never a loss.
pub struct OutboxPublisher<S: KvStore, B: EventBroker> {
    outbox: Outbox<S>,
    broker: B,
    config: PublisherConfig,
    scan_guard: Mutex<()>,
}

impl<S: KvStore, B: EventBroker> OutboxPublisher<S, B> {
    /// Creates a publisher. The configuration is [normalized] first.
    ///
    /// [normalized]: PublisherConfig::normalized
    pub fn new(outbox: Outbox<S>, broker: B, config: PublisherConfig) -> Self {
        Self {
            outbox,
            broker,
            config: config.normalized(),
            scan_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Publishes one batch of unprocessed records.
    ///
    /// Once a record of an aggregate fails, later records of that aggregate
    /// in the same batch are deferred so they are never published ahead of it.
    #[tracing::instrument(skip(self))]
    pub async fn flush_once(&self) -> Result<FlushReport> {
        let _guard = self.scan_guard.lock().await;

        let batch = self.outbox.unprocessed(self.config.batch_size).await?;
        let mut report = FlushReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for mut record in batch {
            if blocked.contains(&record.aggregate_id) {
                report.deferred += 1;
                continue;
            }

            match self.broker.publish(record.to_message()).await {
                Ok(_ack) => {
                    self.outbox
                        .mark_processed(&mut record, self.config.processed_retention)
                        .await?;
                    report.published += 1;
                    metrics::counter!("outbox_published_total").increment(1);
                }
                Err(source) => {
                    let error = OutboxError::Delivery {
                        record_id: record.id,
                        source,
                    };
                    tracing::warn!(
                        aggregate_id = %record.aggregate_id,
                        attempts = record.attempts + 1,
                        %error,
                        "outbox delivery failed"
                    );
                    metrics::counter!("outbox_delivery_failures_total").increment(1);

                    record.record_failure(error.to_string());
                    self.outbox.save(&record).await?;
                    blocked.insert(record.aggregate_id.clone());
                    report.failed += 1;
                }
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                published = report.published,
                failed = report.failed,
                deferred = report.deferred,
                "outbox scan complete"
            );
        }

        Ok(report)
    }
}

impl<S, B> OutboxPublisher<S, B>
where
    S: KvStore + 'static,
    B: EventBroker + 'static,
{
    /// Runs [`flush_once`](Self::flush_once) every `flush_interval` on a
    /// background task until the returned handle is shut down.
    pub fn spawn(self: Arc<Self>) -> PublisherHandle {
        let (stop, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_ms = self.config.flush_interval.as_millis() as u64,
                batch_size = self.config.batch_size,
                "outbox publisher started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush_once().await {
                            tracing::error!(error = %e, "outbox scan failed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("outbox publisher stopped");
        });

        PublisherHandle { stop, task }
    }
}

/// Handle to a running publisher task.
pub struct PublisherHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PublisherHandle {
    /// Returns true once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the publisher to stop and waits for the current scan to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "outbox publisher task failed");
        }
    }
}
