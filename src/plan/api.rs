//! Persistence collaborator interface for weekly plans.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// A weekly plan as the persistence backend stores it.
///
/// `meals` is the serialized plan document. This layer treats its content as
/// opaque and only guarantees that it round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// Backend-assigned identifier; `None` until the record is created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    /// Week key: the Monday of the plan's week, formatted `YYYY-MM-DD`.
    pub week_start: String,
    /// Serialized JSON plan document.
    pub meals: String,
}

/// Input for an upsert through the facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub user_id: String,
    pub week_start: String,
    /// Plan document; serialized before it reaches the backend.
    pub meals: Value,
}

impl PlanDraft {
    pub fn new(user_id: impl Into<String>, week_start: impl Into<String>, meals: Value) -> Self {
        Self {
            user_id: user_id.into(),
            week_start: week_start.into(),
            meals,
        }
    }
}

/// A loaded plan with its payload parsed back into a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPlan {
    pub id: String,
    pub user_id: String,
    pub week_start: String,
    pub meals: Value,
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    /// Stable identifier of the stored record.
    pub plan_id: String,
    /// True when the save created a new record rather than updating one.
    pub created: bool,
}

/// External persistence collaborator.
///
/// Implementations talk to whatever backend actually stores plans; the
/// coordination layer relies only on this surface and is injected with an
/// instance rather than reaching for a global client.
#[async_trait]
pub trait PlanApi: Send + Sync {
    /// All plans belonging to a user.
    async fn fetch_plans(&self, user_id: &str) -> Result<Vec<PlanRecord>, ApiError>;
    /// Store a new record and assign it an identifier.
    async fn create_plan(&self, record: PlanRecord) -> Result<PlanRecord, ApiError>;
    /// Replace the record with the given identifier.
    async fn update_plan(&self, plan_id: &str, record: PlanRecord)
        -> Result<PlanRecord, ApiError>;
    /// Delete the record with the given identifier.
    async fn delete_plan(&self, plan_id: &str) -> Result<(), ApiError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn PlanApi) {}
};
