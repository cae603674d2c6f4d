//! Named lock registry.
//!
//! One process-wide resource class maps to one [`PriorityLock`]. The
//! registry hands out shared instances by name so every caller touching the
//! same resource class serializes through the same queue, while different
//! resource classes stay fully independent. The registry itself is injected
//! wherever locking is needed; nothing here is a global.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::priority::{LockStatus, PriorityLock};

/// Well-known resource names used by the planner.
pub mod names {
    /// Weekly meal plan documents.
    pub const MEAL_PLAN: &str = "meal_plan";
    /// Profile and goal data.
    pub const USER_DATA: &str = "user_data";
    /// User-defined food entries.
    pub const CUSTOM_FOODS: &str = "custom_foods";
    /// Planning rules.
    pub const RULES: &str = "rules";
}

/// Get-or-create map of named [`PriorityLock`] instances.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<PriorityLock>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for a resource name. Every caller asking for the same name gets
    /// the same shared instance.
    pub fn lock(&self, name: &str) -> Arc<PriorityLock> {
        let mut locks = self.guard();
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(PriorityLock::new(name))),
        )
    }

    /// Registered resource names, sorted.
    pub fn names(&self) -> Vec<String> {
        let locks = self.guard();
        let mut names: Vec<String> = locks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Status snapshot of every registered lock, sorted by name.
    pub fn status(&self) -> Vec<LockStatus> {
        let locks = self.guard();
        let mut statuses: Vec<LockStatus> = locks.values().map(|lock| lock.status()).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<PriorityLock>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("locks", &self.names())
            .finish()
    }
}
