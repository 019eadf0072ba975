//! Tests for state persistence through the scheduler

use std::sync::Arc;

use prometheus_lockable_resources::builders::SchedulerBuilder;
use prometheus_lockable_resources::config::{SchedulerConfig, StoreBackendConfig};
use prometheus_lockable_resources::core::{
    Acquisition, RequiredResources, ResourceDefinition, StateStore,
};
use prometheus_lockable_resources::infra::{InMemoryJobDirectory, InMemoryStateStore, JsonFileStateStore};
use prometheus_lockable_resources::util::serde::JobRef;

#[tokio::test]
async fn test_every_grant_and_release_is_saved() {
    let store = Arc::new(InMemoryStateStore::new());
    let jobs = Arc::new(InMemoryJobDirectory::new());
    jobs.register("j1");
    let scheduler = SchedulerBuilder::new(SchedulerConfig {
        resources: vec![ResourceDefinition::new("a", "lab")],
        ..SchedulerConfig::default()
    })
    .jobs(jobs)
    .store(store.clone())
    .build()
    .unwrap();

    let before = store.save_count();
    scheduler
        .acquire(RequiredResources::named(["a"]), &JobRef::new("j1", "p"), "j1")
        .await
        .unwrap();
    scheduler.release(&["a".to_string()], "j1").await;
    assert_eq!(store.save_count(), before + 2);
}

#[tokio::test]
async fn test_json_file_round_trip_across_restart() {
    let dir = std::env::temp_dir().join(format!("lockable-state-{}", uuid::Uuid::new_v4()));
    let cfg = SchedulerConfig {
        resources: vec![ResourceDefinition::new("a", "lab"), ResourceDefinition::new("b", "lab")],
        store: StoreBackendConfig::File,
        state_file: Some(dir.join("state.json")),
        ..SchedulerConfig::default()
    };
    let jobs = Arc::new(InMemoryJobDirectory::new());
    jobs.register("j1");
    jobs.register("j2");

    {
        let scheduler = SchedulerBuilder::new(cfg.clone()).jobs(jobs.clone()).build().unwrap();
        assert!(scheduler.reserve(&["b".to_string()], "ops").await);
        assert!(scheduler.create_resource("c", "lab extra"));
        let granted = scheduler
            .acquire(RequiredResources::named(["a"]), &JobRef::new("j1", "p"), "j1")
            .await
            .unwrap();
        assert!(matches!(granted, Acquisition::Granted(_)));
        let queued = scheduler
            .acquire(RequiredResources::named(["a"]), &JobRef::new("j2", "p"), "waiting for a")
            .await
            .unwrap();
        assert!(matches!(queued, Acquisition::Queued(_)));
    }

    let state = JsonFileStateStore::new(dir.join("state.json")).unwrap().load().unwrap();
    assert_eq!(state.resources.len(), 3);
    assert_eq!(state.waiting.len(), 1);
    assert_eq!(state.waiting[0].description, "waiting for a");

    let restarted = SchedulerBuilder::new(cfg).jobs(jobs).build().unwrap();
    assert_eq!(restarted.resource("b").unwrap().reserved_by.as_deref(), Some("ops"));
    assert!(restarted.resource("c").unwrap().labels.contains("extra"));
    // Locks are not persisted; a fresh process starts with every lock free.
    assert!(!restarted.resource("a").unwrap().is_locked());
    let _ = std::fs::remove_dir_all(dir);
}
