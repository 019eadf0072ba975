//! Tests for audit sink

use std::sync::Arc;

use parking_lot::Mutex;
use prometheus_lockable_resources::core::{
    build_audit_event, AdmissionScheduler, AuditSink, InMemoryAuditSink, RequiredResources,
    Resource, ResourcePool,
};
use prometheus_lockable_resources::infra::{InMemoryJobDirectory, InMemoryStateStore};
use prometheus_lockable_resources::util::serde::JobRef;

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("build#1", &["rack-1".to_string()], "lock", Some("payload".to_string()));

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].subject, "build#1");
    assert_eq!(events[0].resources, vec!["rack-1".to_string()]);
    assert_eq!(events[0].action, "lock");
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("j1", &[], "lock", None));
    sink.record(build_audit_event("j2", &[], "lock", None));
    sink.record(build_audit_event("j3", &[], "lock", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject, "j2"); // First one popped
    assert_eq!(events[1].subject, "j3");
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event("j1", &[], "unlock", Some("released".to_string()));
    assert!(!event.event_id.is_empty());
    assert_eq!(event.payload, Some("released".to_string()));
    assert!(event.created_at_ms > 0);
}

#[tokio::test]
async fn test_scheduler_records_decisions() {
    let sink = Arc::new(Mutex::new(InMemoryAuditSink::new(16)));
    let jobs = Arc::new(InMemoryJobDirectory::new());
    jobs.register("j1");
    let scheduler = AdmissionScheduler::new(
        ResourcePool::new(vec![Resource::new("a")]),
        jobs,
        Arc::new(InMemoryStateStore::new()),
    )
    .with_audit(Box::new(Arc::clone(&sink)));

    let job = JobRef::new("j1", "p");
    scheduler
        .acquire(RequiredResources::named(["a"]), &job, "j1")
        .await
        .unwrap();
    scheduler.release(&["a".to_string()], "j1").await;

    let actions: Vec<String> = sink.lock().events().into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec!["lock", "unlock"]);
}
