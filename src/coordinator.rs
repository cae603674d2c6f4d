//! Top-level wiring for the coordination core.
//!
//! [`Coordinator`] owns one instance of each subsystem and connects them:
//! the registry's `meal_plan` lock serializes the plan facade, the facade
//! backs the replay dispatcher, and the connectivity monitor's transitions
//! drive queue drains. Construction is plain dependency injection; nothing
//! here is a global.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::history::{AutosaveEvent, HistoryConfig, HistoryStack};
use crate::lock::{names, LockRegistry, LockStatus};
use crate::offline::{
    ConnectivityEvent, ConnectivityMonitor, ConnectivityProbe, ConnectivityState, HttpProbe,
    NetworkStatus, OfflineConfig, OfflineError, OfflineQueue, PlanDispatcher, QueueJournal,
    QueueStatus, QueuedOperation, SubmitOutcome,
};
use crate::plan::{PlanApi, PlanDraft, PlanResult, PlanStore, PlanStoreConfig, WeeklyPlan};

/// Errors raised while assembling the coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to build connectivity probe: {0}")]
    Probe(#[from] reqwest::Error),
}

/// Bundled configuration for every subsystem.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Directory holding durable coordination state (the pending journal).
    pub data_dir: PathBuf,
    pub plans: PlanStoreConfig,
    pub history: HistoryConfig,
    pub offline: OfflineConfig,
}

impl CoordinatorConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            plans: PlanStoreConfig::new(),
            history: HistoryConfig::new(),
            offline: OfflineConfig::new(),
        }
    }

    /// Defaults with `MEALSYNC_*` environment overrides applied.
    pub fn from_env(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            offline: OfflineConfig::from_env(),
            ..Self::new(data_dir)
        }
    }

    pub fn with_plans(mut self, plans: PlanStoreConfig) -> Self {
        self.plans = plans;
        self
    }

    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    pub fn with_offline(mut self, offline: OfflineConfig) -> Self {
        self.offline = offline;
        self
    }
}

/// Combined snapshot of every subsystem, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub locks: Vec<LockStatus>,
    pub queue: QueueStatus,
    pub network: NetworkStatus,
}

/// Owns and wires the lock registry, plan facade, history stack,
/// connectivity monitor, and offline queue.
pub struct Coordinator {
    locks: Arc<LockRegistry>,
    plans: Arc<PlanStore>,
    history: Arc<HistoryStack>,
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<OfflineQueue>,
    connectivity_events: Mutex<Option<mpsc::Receiver<ConnectivityEvent>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Assemble with an HTTP probe against the configured endpoint.
    /// `initial` is the platform's currently reported connectivity.
    pub fn new(
        api: Arc<dyn PlanApi>,
        initial: ConnectivityState,
        config: CoordinatorConfig,
    ) -> Result<(Self, mpsc::Receiver<AutosaveEvent>), CoordinatorError> {
        let probe = Arc::new(HttpProbe::new(config.offline.probe_url.clone())?);
        Ok(Self::with_probe(api, probe, initial, config))
    }

    /// Assemble with an injected probe.
    pub fn with_probe(
        api: Arc<dyn PlanApi>,
        probe: Arc<dyn ConnectivityProbe>,
        initial: ConnectivityState,
        config: CoordinatorConfig,
    ) -> (Self, mpsc::Receiver<AutosaveEvent>) {
        let locks = Arc::new(LockRegistry::new());
        let plan_lock = locks.lock(names::MEAL_PLAN);
        let plans = Arc::new(PlanStore::with_config(api, plan_lock, config.plans));

        let (history, autosave_events) = HistoryStack::new(config.history);
        let history = Arc::new(history);

        let (monitor, connectivity_events) =
            ConnectivityMonitor::new(probe, initial, config.offline.probe_interval);
        let monitor = Arc::new(monitor);

        let dispatcher = Arc::new(PlanDispatcher::new(Arc::clone(&plans)));
        let journal = QueueJournal::new(&config.data_dir);
        let queue = Arc::new(OfflineQueue::new(
            config.offline,
            Arc::clone(&monitor),
            dispatcher,
            journal,
        ));

        (
            Self {
                locks,
                plans,
                history,
                monitor,
                queue,
                connectivity_events: Mutex::new(Some(connectivity_events)),
                listener: Mutex::new(None),
            },
            autosave_events,
        )
    }

    /// Bring the coordinator online: start the probe loop, reload the
    /// pending journal, hook queue drains to connectivity transitions, and
    /// replay immediately when already connected. Returns the number of
    /// journaled operations restored. Only the first call restores and
    /// wires the drain listener; repeat calls keep the probe loop running
    /// and return 0, so pending work is never loaded twice.
    pub async fn start(&self) -> usize {
        self.monitor.start();
        let Some(events) = self.events_guard().take() else {
            return 0;
        };
        let restored = self.queue.restore();
        *self.listener_guard() = Some(self.queue.start(events));
        if self.monitor.is_online() {
            self.queue.drain().await;
        }
        restored
    }

    /// Stop background work: the probe loop, the drain listener, and any
    /// debounced autosave still pending.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        let listener = self.listener_guard().take();
        if let Some(handle) = listener {
            handle.abort();
            let _ = handle.await;
        }
        self.history.cancel_pending_autosave();
    }

    /// Save a weekly plan through the offline queue.
    pub async fn submit_save(&self, draft: PlanDraft) -> Result<SubmitOutcome, OfflineError> {
        self.queue
            .submit(QueuedOperation::SavePlan(draft), "save weekly plan")
            .await
    }

    /// Delete a weekly plan through the offline queue.
    pub async fn submit_delete(
        &self,
        plan_id: impl Into<String>,
    ) -> Result<SubmitOutcome, OfflineError> {
        self.queue
            .submit(
                QueuedOperation::DeletePlan {
                    plan_id: plan_id.into(),
                },
                "delete weekly plan",
            )
            .await
    }

    /// Load a weekly plan directly through the facade. Loads outrank queued
    /// writes on the shared lock, so this stays responsive mid-drain.
    pub async fn load_plan(
        &self,
        user_id: &str,
        week_start: &str,
    ) -> PlanResult<Option<WeeklyPlan>> {
        self.plans.load(user_id, week_start).await
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            locks: self.locks.status(),
            queue: self.queue.status(),
            network: self.monitor.status(),
        }
    }

    pub fn locks(&self) -> Arc<LockRegistry> {
        Arc::clone(&self.locks)
    }

    pub fn plans(&self) -> Arc<PlanStore> {
        Arc::clone(&self.plans)
    }

    pub fn history(&self) -> Arc<HistoryStack> {
        Arc::clone(&self.history)
    }

    pub fn monitor(&self) -> Arc<ConnectivityMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn queue(&self) -> Arc<OfflineQueue> {
        Arc::clone(&self.queue)
    }

    fn events_guard(&self) -> MutexGuard<'_, Option<mpsc::Receiver<ConnectivityEvent>>> {
        self.connectivity_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listener_guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("network", &self.monitor.state())
            .field("pending", &self.queue.pending_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MemoryPlanApi;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct StaticProbe(bool);

    #[async_trait]
    impl ConnectivityProbe for StaticProbe {
        async fn check(&self) -> bool {
            self.0
        }
    }

    fn coordinator(
        initial: ConnectivityState,
        dir: &TempDir,
    ) -> (
        Coordinator,
        Arc<MemoryPlanApi>,
        mpsc::Receiver<AutosaveEvent>,
    ) {
        let api = Arc::new(MemoryPlanApi::new());
        let config = CoordinatorConfig::new(dir.path())
            .with_offline(OfflineConfig::new().with_probe_interval(Duration::from_secs(3_600)));
        let (coordinator, autosave_events) = Coordinator::with_probe(
            Arc::clone(&api) as Arc<dyn PlanApi>,
            Arc::new(StaticProbe(true)),
            initial,
            config,
        );
        (coordinator, api, autosave_events)
    }

    fn draft(week: &str) -> PlanDraft {
        PlanDraft::new("user-1", week, json!({"monday": ["oatmeal"]}))
    }

    #[tokio::test]
    async fn online_save_lands_in_the_backend_and_loads_back() {
        let dir = TempDir::new().unwrap();
        let (coordinator, api, _autosave) = coordinator(ConnectivityState::Online, &dir);

        let outcome = coordinator.submit_save(draft("2025-03-10")).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Completed);
        assert_eq!(api.record_count().await, 1);

        let loaded = coordinator.load_plan("user-1", "2025-03-10").await.unwrap();
        assert_eq!(loaded.unwrap().meals, json!({"monday": ["oatmeal"]}));
    }

    #[tokio::test]
    async fn offline_saves_drain_when_connectivity_returns() {
        let dir = TempDir::new().unwrap();
        let (coordinator, api, _autosave) = coordinator(ConnectivityState::Offline, &dir);
        coordinator.start().await;

        let outcome = coordinator.submit_save(draft("2025-03-10")).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);
        assert_eq!(api.record_count().await, 0);
        assert_eq!(coordinator.status().queue.pending, 1);

        coordinator.monitor().report_online();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(coordinator.status().queue.pending, 0);
        assert_eq!(api.record_count().await, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn start_replays_the_journal_from_a_previous_run() {
        let dir = TempDir::new().unwrap();
        {
            let (previous, _api, _autosave) = coordinator(ConnectivityState::Offline, &dir);
            previous.submit_save(draft("2025-03-10")).await.unwrap();
            previous.submit_save(draft("2025-03-17")).await.unwrap();
        }

        let (coordinator, api, _autosave) = coordinator(ConnectivityState::Online, &dir);
        let restored = coordinator.start().await;
        assert_eq!(restored, 2);
        assert_eq!(coordinator.status().queue.pending, 0);
        assert_eq!(api.record_count().await, 2);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_start_does_not_duplicate_restored_work() {
        let dir = TempDir::new().unwrap();
        {
            let (previous, _api, _autosave) = coordinator(ConnectivityState::Offline, &dir);
            previous.submit_save(draft("2025-03-10")).await.unwrap();
        }

        let (coordinator, api, _autosave) = coordinator(ConnectivityState::Offline, &dir);
        assert_eq!(coordinator.start().await, 1);
        assert_eq!(coordinator.start().await, 0);
        assert_eq!(coordinator.status().queue.pending, 1);
        assert_eq!(api.record_count().await, 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn status_reports_every_subsystem() {
        let dir = TempDir::new().unwrap();
        let (coordinator, _api, _autosave) = coordinator(ConnectivityState::Offline, &dir);

        let status = coordinator.status();
        assert!(status
            .locks
            .iter()
            .any(|lock| lock.name == names::MEAL_PLAN));
        assert_eq!(status.queue.capacity, 50);
        assert_eq!(status.network.state, ConnectivityState::Offline);
    }

    #[tokio::test]
    async fn shutdown_stops_background_work() {
        let dir = TempDir::new().unwrap();
        let (coordinator, _api, _autosave) = coordinator(ConnectivityState::Online, &dir);
        coordinator.start().await;
        assert!(coordinator.monitor().is_running());

        coordinator.shutdown().await;
        assert!(!coordinator.monitor().is_running());
    }
}
