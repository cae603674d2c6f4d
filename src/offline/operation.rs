//! Closed set of replayable operations.
//!
//! Durable pending work is described by [`QueuedOperation`]: a closed enum
//! rather than an open string-keyed handler table, so replay dispatch is an
//! exhaustive match the compiler checks. Adding an operation kind means
//! adding a variant and the match arm that routes it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::plan::{PlanDraft, PlanError, PlanStore};

/// Durable operation kinds the queue can replay after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation_type", content = "payload", rename_all = "snake_case")]
pub enum QueuedOperation {
    /// Upsert a weekly plan.
    SavePlan(PlanDraft),
    /// Delete a plan by id.
    DeletePlan { plan_id: String },
}

impl QueuedOperation {
    /// Stable label for logs and status output.
    pub fn label(&self) -> &'static str {
        match self {
            QueuedOperation::SavePlan(_) => "save_plan",
            QueuedOperation::DeletePlan { .. } => "delete_plan",
        }
    }
}

/// Journal entry: one replayable operation plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    #[serde(flatten)]
    pub operation: QueuedOperation,
    pub description: String,
    /// Unix epoch milliseconds at enqueue time.
    pub enqueued_at_epoch_ms: i64,
}

impl PendingRecord {
    pub fn new(operation: QueuedOperation, description: impl Into<String>) -> Self {
        Self {
            operation,
            description: description.into(),
            enqueued_at_epoch_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Routes queued operations to their executors.
#[async_trait]
pub trait OperationDispatcher: Send + Sync {
    async fn dispatch(&self, operation: &QueuedOperation) -> Result<(), ApiError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn OperationDispatcher) {}
};

/// Default dispatcher: every operation kind maps onto the plan facade.
pub struct PlanDispatcher {
    plans: Arc<PlanStore>,
}

impl PlanDispatcher {
    pub fn new(plans: Arc<PlanStore>) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl OperationDispatcher for PlanDispatcher {
    async fn dispatch(&self, operation: &QueuedOperation) -> Result<(), ApiError> {
        match operation {
            QueuedOperation::SavePlan(draft) => self
                .plans
                .save(draft.clone())
                .await
                .map(|_| ())
                .map_err(plan_error_to_api),
            QueuedOperation::DeletePlan { plan_id } => self
                .plans
                .delete(plan_id)
                .await
                .map_err(plan_error_to_api),
        }
    }
}

/// Collapse a facade error into the collaborator currency the queue
/// classifies. Backend errors pass through untouched so their code and
/// message keep driving retry decisions.
fn plan_error_to_api(error: PlanError) -> ApiError {
    match error {
        PlanError::Api(api) => api,
        other => ApiError::new(other.to_string()),
    }
}
