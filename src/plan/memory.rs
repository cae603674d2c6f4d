//! In-memory persistence backend.
//!
//! Backs tests and demos with the same surface a real backend exposes:
//! identifier assignment on create, fetch by user, plus scripted failures
//! and id-stripping so callers can exercise their retry and verification
//! paths.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::api::{PlanApi, PlanRecord};
use crate::error::ApiError;

#[derive(Default)]
pub struct MemoryPlanApi {
    records: Mutex<HashMap<String, PlanRecord>>,
    next_id: AtomicU64,
    scripted_failures: Mutex<VecDeque<ApiError>>,
    strip_ids: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MemoryPlanApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error; the next backend call consumes and returns it.
    pub async fn fail_next(&self, error: ApiError) {
        self.scripted_failures.lock().await.push_back(error);
    }

    /// When enabled, create/update responses omit the record id, which is
    /// the malformed-backend shape save verification guards against.
    pub fn strip_ids(&self, enabled: bool) {
        self.strip_ids.store(enabled, Ordering::SeqCst);
    }

    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Method names in invocation order.
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn observe(&self, method: &str) -> Result<(), ApiError> {
        self.calls.lock().await.push(method.to_string());
        match self.scripted_failures.lock().await.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn present(&self, mut record: PlanRecord) -> PlanRecord {
        if self.strip_ids.load(Ordering::SeqCst) {
            record.id = None;
        }
        record
    }
}

#[async_trait]
impl PlanApi for MemoryPlanApi {
    async fn fetch_plans(&self, user_id: &str) -> Result<Vec<PlanRecord>, ApiError> {
        self.observe("fetch_plans").await?;
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_plan(&self, mut record: PlanRecord) -> Result<PlanRecord, ApiError> {
        self.observe("create_plan").await?;
        let id = format!("plan-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        record.id = Some(id.clone());
        self.records.lock().await.insert(id, record.clone());
        Ok(self.present(record))
    }

    async fn update_plan(
        &self,
        plan_id: &str,
        mut record: PlanRecord,
    ) -> Result<PlanRecord, ApiError> {
        self.observe("update_plan").await?;
        let mut records = self.records.lock().await;
        if !records.contains_key(plan_id) {
            return Err(ApiError::new(format!("plan {plan_id} not found")));
        }
        record.id = Some(plan_id.to_string());
        records.insert(plan_id.to_string(), record.clone());
        Ok(self.present(record))
    }

    async fn delete_plan(&self, plan_id: &str) -> Result<(), ApiError> {
        self.observe("delete_plan").await?;
        self.records.lock().await.remove(plan_id);
        Ok(())
    }
}
