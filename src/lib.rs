//! Coordination core for an offline-first weekly meal planner.
//!
//! The backend is a plain HTTP persistence service; everything that makes
//! concurrent edits safe and offline sessions survivable lives client-side,
//! in this crate:
//!
//! - [`lock`]: named async mutual exclusion with priority-ordered waiting,
//!   so reads overtake queued writes on shared resources.
//! - [`plan`]: the weekly-plan facade. Every load, save, and delete runs
//!   inside the shared `meal_plan` lock, which removes the lost-update
//!   races a bare REST client would have.
//! - [`history`]: bounded undo snapshots plus debounced autosave, so rapid
//!   edits collapse into one write.
//! - [`offline`]: a connectivity monitor and a journaled operation queue
//!   that replays pending work when the network returns.
//! - [`coordinator`]: dependency-injected wiring of the above into one
//!   object an application embeds.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mealsync::coordinator::{Coordinator, CoordinatorConfig};
//! use mealsync::offline::ConnectivityState;
//! use mealsync::plan::{MemoryPlanApi, PlanApi, PlanDraft};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api: Arc<dyn PlanApi> = Arc::new(MemoryPlanApi::new());
//! let config = CoordinatorConfig::from_env("/var/lib/mealsync");
//! let (coordinator, _autosave_events) =
//!     Coordinator::new(api, ConnectivityState::Online, config)?;
//! coordinator.start().await;
//!
//! let draft = PlanDraft::new("user-1", "2025-03-10", json!({"monday": []}));
//! coordinator.submit_save(draft).await?;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod history;
pub mod lock;
pub mod offline;
pub mod plan;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorStatus};
pub use error::{ApiError, FailureClass};
pub use history::{AutosaveEvent, AutosaveTrigger, HistoryConfig, HistoryStack};
pub use lock::{AcquireRequest, LockError, LockRegistry, LockStatus, PriorityLock};
pub use offline::{
    ConnectivityMonitor, ConnectivityState, OfflineError, OfflineQueue, QueuedOperation,
    SubmitOutcome,
};
pub use plan::{PlanApi, PlanDraft, PlanError, PlanStore, SaveOutcome, WeeklyPlan};
