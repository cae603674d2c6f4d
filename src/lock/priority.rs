//! Priority-aware async mutual exclusion.
//!
//! A [`PriorityLock`] serializes asynchronous operations against one shared
//! resource. Waiters are granted in priority order (highest first) with FIFO
//! ordering between equal priorities, each `acquire` call carries a single
//! deadline covering both its queue time and its execution, and release
//! happens on settle no matter how the operation ends, so a failing
//! operation can never wedge the resource.

use std::cmp::Reverse;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Deadline applied when a request does not set one.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Priority applied when a request does not set one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Errors surfaced by [`PriorityLock::acquire`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The deadline elapsed before the operation settled. When this fires
    /// while the operation is already running, the operation itself is not
    /// cancelled; only the caller's wait is abandoned.
    #[error("timed out on lock {name} after {waited_ms}ms ({description})")]
    Timeout {
        name: String,
        description: String,
        waited_ms: u64,
    },
    /// The waiter was rejected by [`PriorityLock::clear_queue`].
    #[error("lock {name} queue cleared while waiting ({description})")]
    QueueCleared { name: String, description: String },
    /// The operation task was torn down before settling, which only happens
    /// while the runtime is shutting down.
    #[error("operation on lock {name} was interrupted before completing")]
    Interrupted { name: String },
}

pub type LockResult<T> = Result<T, LockError>;

/// Parameters for a single [`PriorityLock::acquire`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    /// Shown in [`LockStatus`] and log lines while the operation runs or waits.
    pub description: String,
    /// Higher priorities are granted first. Default: 0.
    pub priority: i32,
    /// Deadline covering queue time plus execution. Default: 30 seconds.
    pub timeout: Duration,
}

impl Default for AcquireRequest {
    fn default() -> Self {
        Self {
            description: "operation".to_string(),
            priority: DEFAULT_PRIORITY,
            timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl AcquireRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Snapshot of a lock for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub name: String,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_operation: Option<String>,
    pub queue_length: usize,
    /// Waiters in grant order (priority descending, FIFO within a priority).
    pub waiters: Vec<WaiterStatus>,
}

/// One queued waiter inside a [`LockStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct WaiterStatus {
    pub description: String,
    pub priority: i32,
    pub waited_ms: u64,
}

struct Waiter {
    entry_seq: u64,
    priority: i32,
    description: String,
    enqueued_at: Instant,
    grant_tx: oneshot::Sender<Grant>,
}

/// Handover message for a queued waiter. The receiving `acquire` takes the
/// sequence and runs. If the waiting future is instead dropped with the
/// grant still buffered in its channel (its task was aborted after the
/// holder settled), dropping the grant releases the slot, so the lock moves
/// on rather than staying held for a waiter that no longer exists.
struct Grant {
    state: Arc<Mutex<LockState>>,
    name: String,
    seq: u64,
    taken: bool,
}

impl Grant {
    fn take(mut self) -> u64 {
        self.taken = true;
        self.seq
    }

    /// Discard without releasing. Only for the failed-send path inside
    /// `grant_next`, which holds the state guard and picks the next waiter
    /// itself.
    fn defuse(mut self) {
        self.taken = true;
    }
}

impl Drop for Grant {
    fn drop(&mut self) {
        if !self.taken {
            tracing::debug!(
                lock = %self.name,
                seq = self.seq,
                "waiter gone after grant; releasing slot"
            );
            PriorityLock::release_slot(&self.state, &self.name, self.seq);
        }
    }
}

struct LockState {
    held: bool,
    current_operation: Option<String>,
    /// Bumped on every grant. Settle releases carry the sequence they were
    /// granted under; a mismatch means [`PriorityLock::force_release`]
    /// already moved the lock on and the release must be ignored.
    grant_seq: u64,
    next_entry_seq: u64,
    waiters: Vec<Waiter>,
}

enum Admission {
    Granted(u64),
    Queued {
        entry_seq: u64,
        grant_rx: oneshot::Receiver<Grant>,
    },
}

/// Named async lock with a priority wait queue.
pub struct PriorityLock {
    name: String,
    state: Arc<Mutex<LockState>>,
}

impl PriorityLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(LockState {
                held: false,
                current_operation: None,
                grant_seq: 0,
                next_entry_seq: 0,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_locked(&self) -> bool {
        self.lock_state().held
    }

    /// Run `operation` while holding the lock.
    ///
    /// If the lock is free the operation starts immediately; otherwise the
    /// call joins the wait queue and is granted in (priority desc, arrival
    /// asc) order. `request.timeout` is a single deadline over the whole
    /// call. A deadline that fires while still queued removes the entry and
    /// fails with [`LockError::Timeout`]. A deadline that fires while the
    /// operation runs abandons only the caller's wait: the operation keeps
    /// running on its own task, releases the lock when it settles, and may
    /// therefore still mutate shared state after this call reported failure.
    /// Dropping this future itself is safe at any point: a grant already
    /// sent to it is reclaimed and passes to the next waiter.
    pub async fn acquire<T, F>(&self, request: AcquireRequest, operation: F) -> LockResult<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + request.timeout;

        let admission = {
            let mut state = self.lock_state();
            if !state.held {
                state.held = true;
                state.current_operation = Some(request.description.clone());
                state.grant_seq += 1;
                Admission::Granted(state.grant_seq)
            } else {
                let (grant_tx, grant_rx) = oneshot::channel();
                let entry_seq = state.next_entry_seq;
                state.next_entry_seq += 1;
                state.waiters.push(Waiter {
                    entry_seq,
                    priority: request.priority,
                    description: request.description.clone(),
                    enqueued_at: started,
                    grant_tx,
                });
                Admission::Queued {
                    entry_seq,
                    grant_rx,
                }
            }
        };

        let grant_seq = match admission {
            Admission::Granted(seq) => seq,
            Admission::Queued {
                entry_seq,
                mut grant_rx,
            } => {
                let sleep = tokio::time::sleep_until(deadline);
                tokio::pin!(sleep);
                tokio::select! {
                    granted = &mut grant_rx => match granted {
                        Ok(grant) => grant.take(),
                        Err(_) => {
                            return Err(LockError::QueueCleared {
                                name: self.name.clone(),
                                description: request.description,
                            });
                        }
                    },
                    () = &mut sleep => {
                        self.abandon_wait(entry_seq, &mut grant_rx);
                        return Err(LockError::Timeout {
                            name: self.name.clone(),
                            description: request.description,
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
        };

        self.run_granted(request.description, started, deadline, grant_seq, operation)
            .await
    }

    /// Emergency unlock. Grants the next waiter immediately even though the
    /// current operation may still be running; that operation's own settle
    /// release is fenced off by the grant sequence so it cannot double-grant.
    pub fn force_release(&self) {
        let mut state = self.lock_state();
        if !state.held {
            return;
        }
        tracing::warn!(
            lock = %self.name,
            operation = state.current_operation.as_deref().unwrap_or("unknown"),
            "forcing lock release"
        );
        Self::grant_next(&self.state, &self.name, &mut state);
    }

    /// Reject every queued waiter with [`LockError::QueueCleared`]. The
    /// currently running operation is not affected. Returns how many waiters
    /// were rejected.
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<Waiter> = {
            let mut state = self.lock_state();
            state.waiters.drain(..).collect()
        };
        let cleared = drained.len();
        if cleared > 0 {
            tracing::warn!(lock = %self.name, cleared, "clearing lock wait queue");
        }
        // Dropping the grant senders wakes every waiter with a closed channel.
        drop(drained);
        cleared
    }

    pub fn status(&self) -> LockStatus {
        let state = self.lock_state();
        let mut live: Vec<&Waiter> = state
            .waiters
            .iter()
            .filter(|waiter| !waiter.grant_tx.is_closed())
            .collect();
        live.sort_by_key(|waiter| (Reverse(waiter.priority), waiter.entry_seq));
        LockStatus {
            name: self.name.clone(),
            locked: state.held,
            current_operation: state.current_operation.clone(),
            queue_length: live.len(),
            waiters: live
                .into_iter()
                .map(|waiter| WaiterStatus {
                    description: waiter.description.clone(),
                    priority: waiter.priority,
                    waited_ms: waiter.enqueued_at.elapsed().as_millis() as u64,
                })
                .collect(),
        }
    }

    async fn run_granted<T, F>(
        &self,
        description: String,
        started: Instant,
        deadline: Instant,
        grant_seq: u64,
        operation: F,
    ) -> LockResult<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let operation_handle = tokio::spawn(operation);
        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        // The watcher owns the release so settle frees the lock even when
        // the caller has abandoned its wait or the operation panicked.
        tokio::spawn(async move {
            let joined = operation_handle.await;
            if matches!(&joined, Err(err) if err.is_panic()) {
                tracing::error!(lock = %name, "operation panicked while holding lock");
            }
            Self::release_slot(&state, &name, grant_seq);
            let _ = done_tx.send(joined);
        });

        match tokio::time::timeout_at(deadline, done_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(join_err))) => {
                if join_err.is_panic() {
                    std::panic::resume_unwind(join_err.into_panic());
                }
                Err(LockError::Interrupted {
                    name: self.name.clone(),
                })
            }
            Ok(Err(_watcher_gone)) => Err(LockError::Interrupted {
                name: self.name.clone(),
            }),
            Err(_elapsed) => {
                tracing::warn!(
                    lock = %self.name,
                    description = %description,
                    "deadline elapsed; abandoning caller while operation still holds lock"
                );
                Err(LockError::Timeout {
                    name: self.name.clone(),
                    description,
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Resolve a timed-out wait. Normally the entry is still queued and is
    /// removed. If a grant raced the deadline the entry is gone and the
    /// grant message is already in the channel (grants are sent under the
    /// state guard); harvesting and dropping it hands the slot on.
    fn abandon_wait(&self, entry_seq: u64, grant_rx: &mut oneshot::Receiver<Grant>) {
        let raced_grant = {
            let mut state = self.lock_state();
            let before = state.waiters.len();
            state.waiters.retain(|waiter| waiter.entry_seq != entry_seq);
            if state.waiters.len() < before {
                None
            } else {
                grant_rx.try_recv().ok()
            }
        };
        // Dropped outside the state guard so the release can retake it.
        drop(raced_grant);
    }

    fn release_slot(shared: &Arc<Mutex<LockState>>, name: &str, expected_seq: u64) {
        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if state.grant_seq != expected_seq {
            tracing::debug!(lock = %name, "ignoring stale release");
            return;
        }
        Self::grant_next(shared, name, &mut state);
    }

    /// Hand the lock to the best-ranked live waiter, or mark it free.
    fn grant_next(shared: &Arc<Mutex<LockState>>, name: &str, state: &mut LockState) {
        loop {
            let best = state
                .waiters
                .iter()
                .enumerate()
                .max_by_key(|(_, waiter)| (waiter.priority, Reverse(waiter.entry_seq)))
                .map(|(idx, _)| idx);
            let Some(idx) = best else {
                state.held = false;
                state.current_operation = None;
                return;
            };
            let waiter = state.waiters.remove(idx);
            state.grant_seq += 1;
            state.held = true;
            state.current_operation = Some(waiter.description);
            let grant = Grant {
                state: Arc::clone(shared),
                name: name.to_string(),
                seq: state.grant_seq,
                taken: false,
            };
            match waiter.grant_tx.send(grant) {
                Ok(()) => return,
                // Receiver gone: that waiter abandoned its wait entirely.
                // The guard is held here, so the returned grant must not
                // release; the loop regrants itself.
                Err(grant) => grant.defuse(),
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PriorityLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("PriorityLock")
            .field("name", &self.name)
            .field("held", &state.held)
            .field("queue_length", &state.waiters.len())
            .finish()
    }
}
