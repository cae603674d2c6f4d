//! Locked plan facade.
//!
//! Every plan operation is serialized through the shared `meal_plan` lock
//! with a fixed priority: pending loads outrank pending deletes, which
//! outrank pending saves. The user should never wait on a read because an
//! autosave got there first.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::api::{PlanApi, PlanDraft, PlanRecord, SaveOutcome, WeeklyPlan};
use crate::error::ApiError;
use crate::lock::{AcquireRequest, LockError, LockStatus, PriorityLock, DEFAULT_ACQUIRE_TIMEOUT};

/// Priority for loads.
pub const LOAD_PRIORITY: i32 = 10;
/// Priority for deletes.
pub const DELETE_PRIORITY: i32 = 8;
/// Priority for saves.
pub const SAVE_PRIORITY: i32 = 5;

/// Failures surfaced by [`PlanStore`].
#[derive(Debug, Error)]
pub enum PlanError {
    /// The shared lock could not be acquired (or the operation settled)
    /// within the deadline. Always surfaced, never retried here.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// The persistence collaborator failed.
    #[error("plan backend call failed: {0}")]
    Api(#[from] ApiError),
    /// A save settled without a stable identifier in the response. The
    /// write may or may not have landed; callers must treat it as failed.
    #[error("save returned no plan id for {user_id} week {week_start}")]
    Verification { user_id: String, week_start: String },
    /// The outgoing plan document could not be serialized.
    #[error("plan payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type PlanResult<T> = Result<T, PlanError>;

/// Tuning for the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStoreConfig {
    /// Deadline for each operation, queue time included. Default: 30 s.
    pub acquire_timeout: Duration,
}

impl Default for PlanStoreConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl PlanStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Weekly plan operations behind the shared priority lock.
pub struct PlanStore {
    api: Arc<dyn PlanApi>,
    lock: Arc<PriorityLock>,
    config: PlanStoreConfig,
}

impl PlanStore {
    pub fn new(api: Arc<dyn PlanApi>, lock: Arc<PriorityLock>) -> Self {
        Self::with_config(api, lock, PlanStoreConfig::default())
    }

    pub fn with_config(
        api: Arc<dyn PlanApi>,
        lock: Arc<PriorityLock>,
        config: PlanStoreConfig,
    ) -> Self {
        Self { api, lock, config }
    }

    /// Load the plan for a user and week.
    ///
    /// `Ok(None)` covers both "no record for that week" and "record present
    /// but its payload does not parse": a corrupted payload is recovered
    /// locally with a warning so the app can fall back to an empty week
    /// instead of failing the whole load. Records are matched on both user
    /// and week; a record belonging to another user is never returned even
    /// if the backend hands it back.
    pub async fn load(&self, user_id: &str, week_start: &str) -> PlanResult<Option<WeeklyPlan>> {
        let api = Arc::clone(&self.api);
        let user = user_id.to_string();
        let week = week_start.to_string();
        let request = self.request("load weekly plan", LOAD_PRIORITY);
        self.lock
            .acquire(request, async move {
                let records = api.fetch_plans(&user).await?;
                let Some(record) = records
                    .into_iter()
                    .find(|record| record.user_id == user && record.week_start == week)
                else {
                    return Ok(None);
                };
                let Some(id) = record.id else {
                    tracing::warn!(
                        user_id = %user,
                        week_start = %week,
                        "stored plan has no id; treating as no plan"
                    );
                    return Ok(None);
                };
                match serde_json::from_str::<Value>(&record.meals) {
                    Ok(meals) => Ok(Some(WeeklyPlan {
                        id,
                        user_id: record.user_id,
                        week_start: record.week_start,
                        meals,
                    })),
                    Err(err) => {
                        tracing::warn!(
                            user_id = %user,
                            week_start = %week,
                            error = %err,
                            "stored plan payload is corrupted; treating as no plan"
                        );
                        Ok(None)
                    }
                }
            })
            .await?
    }

    /// Upsert the plan for `(draft.user_id, draft.week_start)`.
    ///
    /// Updates the existing record when one matches, creates otherwise, and
    /// verifies the backend handed back a stable id before reporting
    /// success. Saving the same draft twice is idempotent at the data level.
    pub async fn save(&self, draft: PlanDraft) -> PlanResult<SaveOutcome> {
        let api = Arc::clone(&self.api);
        let request = self.request("save weekly plan", SAVE_PRIORITY);
        self.lock
            .acquire(request, async move {
                let meals = serde_json::to_string(&draft.meals)?;
                let existing = api
                    .fetch_plans(&draft.user_id)
                    .await?
                    .into_iter()
                    .find(|record| {
                        record.user_id == draft.user_id && record.week_start == draft.week_start
                    });
                let record = PlanRecord {
                    id: None,
                    user_id: draft.user_id.clone(),
                    week_start: draft.week_start.clone(),
                    meals,
                };
                let (saved, created) = match existing.and_then(|existing| existing.id) {
                    Some(plan_id) => {
                        let updated = api
                            .update_plan(
                                &plan_id,
                                PlanRecord {
                                    id: Some(plan_id.clone()),
                                    ..record
                                },
                            )
                            .await?;
                        (updated, false)
                    }
                    None => {
                        let fresh = api.create_plan(record).await?;
                        (fresh, true)
                    }
                };
                match saved.id {
                    Some(plan_id) if !plan_id.is_empty() => Ok(SaveOutcome { plan_id, created }),
                    _ => Err(PlanError::Verification {
                        user_id: draft.user_id,
                        week_start: draft.week_start,
                    }),
                }
            })
            .await?
    }

    /// Delete a plan by id.
    pub async fn delete(&self, plan_id: &str) -> PlanResult<()> {
        let api = Arc::clone(&self.api);
        let id = plan_id.to_string();
        let request = self.request("delete weekly plan", DELETE_PRIORITY);
        self.lock
            .acquire(request, async move {
                api.delete_plan(&id).await?;
                Ok(())
            })
            .await?
    }

    /// Snapshot of the underlying lock for diagnostics.
    pub fn lock_status(&self) -> LockStatus {
        self.lock.status()
    }

    fn request(&self, description: &str, priority: i32) -> AcquireRequest {
        AcquireRequest::new(description)
            .with_priority(priority)
            .with_timeout(self.config.acquire_timeout)
    }
}
