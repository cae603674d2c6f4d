//! End-to-end checks for the plan facade and its shared lock: every
//! operation serializes through `meal_plan`, loads outrank queued writes,
//! and backend oddities (corrupt payloads, missing ids) surface the way
//! callers depend on.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mealsync::lock::{names, AcquireRequest, LockRegistry};
use mealsync::plan::{
    week_key_for, MemoryPlanApi, PlanApi, PlanDraft, PlanError, PlanRecord, PlanStore,
};

fn store() -> (Arc<PlanStore>, Arc<MemoryPlanApi>, Arc<LockRegistry>) {
    let api = Arc::new(MemoryPlanApi::new());
    let registry = Arc::new(LockRegistry::new());
    let store = Arc::new(PlanStore::new(
        Arc::clone(&api) as Arc<dyn PlanApi>,
        registry.lock(names::MEAL_PLAN),
    ));
    (store, api, registry)
}

#[tokio::test]
async fn save_load_delete_round_trip() {
    let (store, api, _registry) = store();
    let draft = PlanDraft::new("user-1", "2025-03-10", json!({"monday": ["soup"]}));

    let first = store.save(draft.clone()).await.unwrap();
    assert!(first.created);
    assert_eq!(api.record_count().await, 1);

    // Saving the same week again updates in place.
    let second = store
        .save(PlanDraft::new(
            "user-1",
            "2025-03-10",
            json!({"monday": ["soup", "bread"]}),
        ))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.plan_id, first.plan_id);
    assert_eq!(api.record_count().await, 1);

    let loaded = store.load("user-1", "2025-03-10").await.unwrap().unwrap();
    assert_eq!(loaded.id, first.plan_id);
    assert_eq!(loaded.meals, json!({"monday": ["soup", "bread"]}));

    store.delete(&first.plan_id).await.unwrap();
    assert_eq!(api.record_count().await, 0);
    assert!(store.load("user-1", "2025-03-10").await.unwrap().is_none());
}

#[tokio::test]
async fn queued_operations_run_by_priority_not_arrival() {
    let (store, api, registry) = store();

    // Occupy the shared lock so the facade calls below all queue.
    let lock = registry.lock(names::MEAL_PLAN);
    let holder = {
        let lock = Arc::clone(&lock);
        tokio::spawn(async move {
            lock.acquire(AcquireRequest::new("seed data"), async {
                tokio::time::sleep(Duration::from_millis(120)).await;
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Arrival order: save, delete, load. Grant order must be the reverse:
    // load (10) over delete (8) over save (5).
    let save = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .save(PlanDraft::new("user-1", "2025-03-10", json!({})))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    let delete = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.delete("plan-404").await })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    let load = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.load("user-1", "2025-03-10").await })
    };
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert_eq!(store.lock_status().queue_length, 3);

    holder.await.unwrap().unwrap();
    load.await.unwrap().unwrap();
    let _ = delete.await.unwrap();
    save.await.unwrap().unwrap();

    // The backend call log proves who went first.
    let calls = api.calls().await;
    assert_eq!(calls[0], "fetch_plans"); // load
    assert_eq!(calls[1], "delete_plan"); // delete
    assert_eq!(&calls[2..], ["fetch_plans", "create_plan"]); // save
}

#[tokio::test]
async fn corrupt_payload_loads_as_absent_without_poisoning_the_week() {
    let (store, api, _registry) = store();
    api.create_plan(PlanRecord {
        id: None,
        user_id: "user-1".into(),
        week_start: "2025-03-10".into(),
        meals: "{not json".into(),
    })
    .await
    .unwrap();

    let loaded = store.load("user-1", "2025-03-10").await.unwrap();
    assert!(loaded.is_none());

    // A fresh save for the same week still goes through.
    let outcome = store
        .save(PlanDraft::new("user-1", "2025-03-10", json!({"monday": []})))
        .await
        .unwrap();
    let reloaded = store.load("user-1", "2025-03-10").await.unwrap().unwrap();
    assert_eq!(reloaded.id, outcome.plan_id);
}

#[tokio::test]
async fn save_without_a_returned_id_is_a_verification_failure() {
    let (store, api, _registry) = store();
    api.strip_ids(true);

    let result = store
        .save(PlanDraft::new("user-1", "2025-03-10", json!({})))
        .await;
    assert!(matches!(
        result,
        Err(PlanError::Verification { .. })
    ));
}

#[tokio::test]
async fn plans_key_on_the_monday_of_the_edited_week() {
    let (store, _api, _registry) = store();

    // Wednesday 2025-03-12 belongs to the week starting Monday 2025-03-10.
    let wednesday = chrono::NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
    let week = week_key_for(wednesday);
    assert_eq!(week, "2025-03-10");

    store
        .save(PlanDraft::new("user-1", &week, json!({"wednesday": ["stew"]})))
        .await
        .unwrap();
    let loaded = store.load("user-1", "2025-03-10").await.unwrap().unwrap();
    assert_eq!(loaded.week_start, "2025-03-10");
}
