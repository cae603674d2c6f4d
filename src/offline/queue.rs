//! Pending-operation queue with connectivity-aware dispatch.
//!
//! Online submissions dispatch immediately; offline submissions (and online
//! ones that fail on the network) queue for replay. Durable entries survive
//! restarts through the journal, ad-hoc task entries live in memory only and
//! resolve their caller through a completion channel once replayed. Replay
//! runs front to back: successes leave the queue, network failures re-queue
//! at the back for the next pass, anything else is rejected for good.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::journal::QueueJournal;
use super::monitor::{ConnectivityEvent, ConnectivityMonitor};
use super::operation::{OperationDispatcher, PendingRecord, QueuedOperation};
use super::OfflineConfig;
use crate::error::ApiError;

type TaskResult = Result<Value, ApiError>;
type PendingTask = Arc<dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Errors surfaced to submitters.
#[derive(Debug, Error)]
pub enum OfflineError {
    /// The queue is at capacity; the submission was not recorded.
    #[error("pending operations queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    /// The operation ran and failed for a non-network reason.
    #[error(transparent)]
    Operation(#[from] ApiError),
}

/// How a durable submission was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Dispatched immediately.
    Completed,
    /// Recorded for replay on reconnect.
    Queued,
}

/// How an ad-hoc task submission was handled.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Ran immediately; here is its value.
    Completed(Value),
    /// Queued; the receiver resolves when the task is replayed.
    Queued(oneshot::Receiver<TaskResult>),
}

enum PendingEntry {
    /// Journaled operation; survives restarts.
    Durable(PendingRecord),
    /// In-memory closure; lost on restart, caller notified via `completion`.
    Task {
        task: PendingTask,
        description: String,
        completion: Option<oneshot::Sender<TaskResult>>,
    },
}

impl PendingEntry {
    fn description(&self) -> &str {
        match self {
            PendingEntry::Durable(record) => &record.description,
            PendingEntry::Task { description, .. } => description,
        }
    }

    fn is_durable(&self) -> bool {
        matches!(self, PendingEntry::Durable(_))
    }
}

/// Tally of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub requeued: usize,
    pub rejected: usize,
}

/// Snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub capacity: usize,
    pub durable: usize,
    pub in_memory: usize,
}

/// Connectivity-aware operation queue.
pub struct OfflineQueue {
    config: OfflineConfig,
    monitor: Arc<ConnectivityMonitor>,
    dispatcher: Arc<dyn OperationDispatcher>,
    journal: QueueJournal,
    pending: Mutex<VecDeque<PendingEntry>>,
    drain_gate: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    pub fn new(
        config: OfflineConfig,
        monitor: Arc<ConnectivityMonitor>,
        dispatcher: Arc<dyn OperationDispatcher>,
        journal: QueueJournal,
    ) -> Self {
        Self {
            config,
            monitor,
            dispatcher,
            journal,
            pending: Mutex::new(VecDeque::new()),
            drain_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Submit a durable operation.
    ///
    /// Online: dispatch now; a network-class failure downgrades to queueing,
    /// any other failure is returned to the caller. Offline: queue directly.
    pub async fn submit(
        &self,
        operation: QueuedOperation,
        description: impl Into<String>,
    ) -> Result<SubmitOutcome, OfflineError> {
        let description = description.into();
        if self.monitor.is_online() {
            match self.dispatcher.dispatch(&operation).await {
                Ok(()) => return Ok(SubmitOutcome::Completed),
                Err(error) if error.is_network() => {
                    tracing::warn!(
                        operation = operation.label(),
                        error = %error,
                        "dispatch failed on the network; queueing for replay"
                    );
                }
                Err(error) => return Err(OfflineError::Operation(error)),
            }
        } else {
            tracing::debug!(
                operation = operation.label(),
                description = %description,
                "offline; queueing operation"
            );
        }
        self.enqueue(PendingEntry::Durable(PendingRecord::new(
            operation,
            description,
        )))?;
        Ok(SubmitOutcome::Queued)
    }

    /// Submit an ad-hoc task that cannot be expressed as a durable
    /// operation. Queued tasks do not survive a restart; the returned
    /// receiver resolves when the task is replayed or rejected.
    pub async fn submit_task<F, Fut>(
        &self,
        description: impl Into<String>,
        task: F,
    ) -> Result<TaskOutcome, OfflineError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = TaskResult> + Send + 'static,
    {
        let description = description.into();
        let task: PendingTask = Arc::new(move || task().boxed());
        if self.monitor.is_online() {
            match (task)().await {
                Ok(value) => return Ok(TaskOutcome::Completed(value)),
                Err(error) if error.is_network() => {
                    tracing::warn!(
                        description = %description,
                        error = %error,
                        "task failed on the network; queueing for replay"
                    );
                }
                Err(error) => return Err(OfflineError::Operation(error)),
            }
        } else {
            tracing::debug!(description = %description, "offline; queueing task");
        }
        let (completion_tx, completion_rx) = oneshot::channel();
        self.enqueue(PendingEntry::Task {
            task,
            description,
            completion: Some(completion_tx),
        })?;
        Ok(TaskOutcome::Queued(completion_rx))
    }

    /// Reload durable operations journaled by a previous run. Returns the
    /// number restored; an unreadable journal restores nothing.
    pub fn restore(&self) -> usize {
        let records = match self.journal.load() {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "pending journal unreadable; starting with an empty queue"
                );
                return 0;
            }
        };
        let count = records.len();
        if count == 0 {
            return 0;
        }
        {
            let mut pending = self.pending_guard();
            for record in records {
                pending.push_back(PendingEntry::Durable(record));
            }
        }
        tracing::info!(restored = count, "restored pending operations from journal");
        count
    }

    /// Replay pending entries front to back.
    ///
    /// Each entry is taken off the queue, run, and either retired (success),
    /// re-queued at the back (network failure, retried next pass), or
    /// rejected (anything else). Re-queues skip the capacity check so a flaky
    /// link cannot evict recorded work. Concurrent drains coalesce: a second
    /// caller returns an empty report while one pass is in flight.
    pub async fn drain(&self) -> DrainReport {
        let Ok(_gate) = self.drain_gate.try_lock() else {
            tracing::debug!("replay already in progress; skipping");
            return DrainReport::default();
        };

        let batch_len = self.pending_guard().len();
        if batch_len == 0 {
            return DrainReport::default();
        }
        tracing::info!(pending = batch_len, "replaying pending operations");

        let mut report = DrainReport::default();
        // Bounded to the starting length so entries re-queued during this
        // pass wait for the next one.
        for _ in 0..batch_len {
            let Some(entry) = self.pending_guard().pop_front() else {
                break;
            };
            match entry {
                PendingEntry::Durable(record) => {
                    match self.dispatcher.dispatch(&record.operation).await {
                        Ok(()) => {
                            tracing::debug!(
                                operation = record.operation.label(),
                                description = %record.description,
                                "queued operation replayed"
                            );
                            report.executed += 1;
                        }
                        Err(error) if error.is_network() => {
                            tracing::warn!(
                                operation = record.operation.label(),
                                error = %error,
                                "still unreachable; operation re-queued"
                            );
                            self.pending_guard()
                                .push_back(PendingEntry::Durable(record));
                            report.requeued += 1;
                        }
                        Err(error) => {
                            tracing::error!(
                                operation = record.operation.label(),
                                description = %record.description,
                                error = %error,
                                "queued operation rejected"
                            );
                            report.rejected += 1;
                        }
                    }
                }
                PendingEntry::Task {
                    task,
                    description,
                    mut completion,
                } => match (task)().await {
                    Ok(value) => {
                        tracing::debug!(description = %description, "queued task completed");
                        if let Some(tx) = completion.take() {
                            let _ = tx.send(Ok(value));
                        }
                        report.executed += 1;
                    }
                    Err(error) if error.is_network() => {
                        tracing::warn!(
                            description = %description,
                            error = %error,
                            "still unreachable; task re-queued"
                        );
                        self.pending_guard().push_back(PendingEntry::Task {
                            task,
                            description,
                            completion,
                        });
                        report.requeued += 1;
                    }
                    Err(error) => {
                        tracing::error!(
                            description = %description,
                            error = %error,
                            "queued task rejected"
                        );
                        if let Some(tx) = completion.take() {
                            let _ = tx.send(Err(error));
                        }
                        report.rejected += 1;
                    }
                },
            }
            self.persist_journal();
        }

        tracing::info!(
            executed = report.executed,
            requeued = report.requeued,
            rejected = report.rejected,
            "pending replay finished"
        );
        report
    }

    /// Listen for connectivity transitions and drain on every return to
    /// online. Runs until the monitor's event channel closes.
    pub fn start(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<ConnectivityEvent>,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event == ConnectivityEvent::Online {
                    queue.drain().await;
                }
            }
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_guard().is_empty()
    }

    pub fn status(&self) -> QueueStatus {
        let pending = self.pending_guard();
        let durable = pending.iter().filter(|entry| entry.is_durable()).count();
        QueueStatus {
            pending: pending.len(),
            capacity: self.config.queue_capacity,
            durable,
            in_memory: pending.len() - durable,
        }
    }

    fn enqueue(&self, entry: PendingEntry) -> Result<(), OfflineError> {
        {
            let mut pending = self.pending_guard();
            if pending.len() >= self.config.queue_capacity {
                tracing::warn!(
                    capacity = self.config.queue_capacity,
                    description = entry.description(),
                    "pending queue full; submission rejected"
                );
                return Err(OfflineError::QueueFull {
                    capacity: self.config.queue_capacity,
                });
            }
            pending.push_back(entry);
        }
        self.persist_journal();
        Ok(())
    }

    /// Rewrite the journal from the durable subset of the queue. Journal
    /// failures are logged, never raised; the in-memory queue stays usable.
    fn persist_journal(&self) {
        let records: Vec<PendingRecord> = self
            .pending_guard()
            .iter()
            .filter_map(|entry| match entry {
                PendingEntry::Durable(record) => Some(record.clone()),
                PendingEntry::Task { .. } => None,
            })
            .collect();
        if let Err(error) = self.journal.store(&records) {
            tracing::warn!(error = %error, "failed to persist pending journal");
        }
    }

    fn pending_guard(&self) -> MutexGuard<'_, VecDeque<PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("capacity", &self.config.queue_capacity)
            .field("pending", &self.pending_guard().len())
            .finish_non_exhaustive()
    }
}
