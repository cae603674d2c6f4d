//! Weekly plan persistence behind a shared priority lock.

pub mod api;
pub mod memory;
pub mod store;

pub use api::{PlanApi, PlanDraft, PlanRecord, SaveOutcome, WeeklyPlan};
pub use memory::MemoryPlanApi;
pub use store::{
    PlanError, PlanResult, PlanStore, PlanStoreConfig, DELETE_PRIORITY, LOAD_PRIORITY,
    SAVE_PRIORITY,
};

use chrono::{Datelike, Days, NaiveDate};

/// Monday of the week containing `date`. Plans are keyed by this date.
pub fn week_start_for(date: NaiveDate) -> NaiveDate {
    let days_from_monday = u64::from(date.weekday().num_days_from_monday());
    date - Days::new(days_from_monday)
}

/// Week key for `date`: the containing Monday formatted `YYYY-MM-DD`.
pub fn week_key_for(date: NaiveDate) -> String {
    week_start_for(date).format("%Y-%m-%d").to_string()
}
