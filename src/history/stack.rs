//! Bounded undo snapshots with debounced autosave.
//!
//! Snapshots are deep copies of the app state document, so later edits to
//! the live state can never reach back into history. While the loading flag
//! is set, recording is suppressed: restoring state must not pollute the
//! undo stack. Autosave triggers collapse through a debounce window; each
//! trigger aborts the previous pending timer, so the save closure runs once
//! per quiet period and its outcome is logged and emitted rather than
//! surfaced as a UI interruption.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::HistoryConfig;

/// Outcome of a [`HistoryStack::trigger_autosave`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveTrigger {
    /// Timer (re)armed; the save closure runs after the quiet period.
    Scheduled,
    /// Ignored: state is being loaded.
    SkippedLoading,
    /// Ignored: no user is signed in.
    SkippedNoUser,
}

/// Emitted when a debounced save settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveEvent {
    Completed,
    Failed { message: String },
}

/// Undo stack plus the autosave debouncer.
pub struct HistoryStack {
    config: HistoryConfig,
    snapshots: Mutex<VecDeque<Value>>,
    loading: AtomicBool,
    pending_save: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::Sender<AutosaveEvent>,
}

impl HistoryStack {
    /// Create the stack and the receiver for autosave outcome events.
    /// Dropping the receiver is fine; events are then discarded.
    pub fn new(config: HistoryConfig) -> (Self, mpsc::Receiver<AutosaveEvent>) {
        let (events_tx, events_rx) = mpsc::channel(16);
        (
            Self {
                config,
                snapshots: Mutex::new(VecDeque::new()),
                loading: AtomicBool::new(false),
                pending_save: Mutex::new(None),
                events_tx,
            },
            events_rx,
        )
    }

    /// Record a deep copy of the current state.
    ///
    /// Returns false (recording nothing) while the loading flag is set.
    pub fn save_snapshot(&self, state: &Value) -> bool {
        if self.is_loading() {
            tracing::debug!("skipping history snapshot while loading");
            return false;
        }
        let mut snapshots = self.snapshots();
        snapshots.push_back(state.clone());
        while snapshots.len() > self.config.max_snapshots {
            snapshots.pop_front();
        }
        true
    }

    /// Pop the most recent snapshot. `None` when there is nothing to undo;
    /// never an error.
    pub fn undo(&self) -> Option<Value> {
        let popped = self.snapshots().pop_back();
        if popped.is_none() {
            tracing::debug!("undo requested with empty history");
        }
        popped
    }

    pub fn len(&self) -> usize {
        self.snapshots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots().is_empty()
    }

    pub fn clear(&self) {
        self.snapshots().clear();
    }

    /// Suppress snapshot recording and autosave while state is restored.
    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// (Re)arm the autosave timer. Call after every edit.
    ///
    /// Nothing is scheduled while loading or signed out. Otherwise the
    /// previous pending timer is aborted and a fresh quiet period starts;
    /// when it elapses the save closure runs in silent mode: failures are
    /// logged and emitted as [`AutosaveEvent::Failed`], never raised to the
    /// caller.
    pub fn trigger_autosave<F, Fut, E>(&self, user_id: Option<&str>, save: F) -> AutosaveTrigger
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if self.is_loading() {
            tracing::debug!("skipping autosave trigger while loading");
            return AutosaveTrigger::SkippedLoading;
        }
        let Some(user_id) = user_id else {
            tracing::debug!("skipping autosave trigger with no user");
            return AutosaveTrigger::SkippedNoUser;
        };

        let user = user_id.to_string();
        let debounce = self.config.autosave_debounce;
        let events_tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            match save().await {
                Ok(()) => {
                    tracing::debug!(user_id = %user, "autosave completed");
                    let _ = events_tx.try_send(AutosaveEvent::Completed);
                }
                Err(err) => {
                    tracing::error!(user_id = %user, error = %err, "autosave failed");
                    let _ = events_tx.try_send(AutosaveEvent::Failed {
                        message: err.to_string(),
                    });
                }
            }
        });
        if let Some(previous) = self.pending_handle().replace(handle) {
            previous.abort();
        }
        AutosaveTrigger::Scheduled
    }

    /// Abort a pending autosave timer without running it. Returns whether
    /// one was pending.
    pub fn cancel_pending_autosave(&self) -> bool {
        match self.pending_handle().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn snapshots(&self) -> MutexGuard<'_, VecDeque<Value>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending_save
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for HistoryStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStack")
            .field("snapshots", &self.len())
            .field("loading", &self.is_loading())
            .finish()
    }
}
