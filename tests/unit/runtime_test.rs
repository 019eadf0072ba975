//! Tests for tokio spawner and API helpers

use std::sync::Arc;

use prometheus_lockable_resources::core::{AdmissionScheduler, RequiredResources, Resource, ResourcePool, Spawn};
use prometheus_lockable_resources::infra::{InMemoryJobDirectory, InMemoryStateStore};
use prometheus_lockable_resources::runtime::api::{
    health, pool_snapshot, resource_statuses, submit_acquire, AcquireRequest, AcquireResponse,
};
use prometheus_lockable_resources::runtime::tokio_spawner::TokioSpawner;
use prometheus_lockable_resources::util::serde::JobRef;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::current().unwrap();
    assert!(!spawner.owns_runtime());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_tokio_spawner_requires_runtime() {
    assert!(TokioSpawner::current().is_err());
}

fn scheduler() -> AdmissionScheduler {
    let jobs = Arc::new(InMemoryJobDirectory::new());
    jobs.register("j1");
    jobs.register("j2");
    AdmissionScheduler::new(
        ResourcePool::new(vec![
            Resource::new("a").with_labels("lab"),
            Resource::new("b").with_labels("lab"),
        ]),
        jobs,
        Arc::new(InMemoryStateStore::new()),
    )
}

#[tokio::test]
async fn test_submit_acquire_and_snapshot() {
    let scheduler = scheduler();
    let granted = submit_acquire(
        &scheduler,
        AcquireRequest {
            job: JobRef::new("j1", "p"),
            required: RequiredResources::with_label("lab", 2),
            description: "j1".into(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(granted, AcquireResponse::Granted { ref resources } if resources.len() == 2));

    let queued = submit_acquire(
        &scheduler,
        AcquireRequest {
            job: JobRef::new("j2", "p"),
            required: RequiredResources::named(["a"]),
            description: "j2".into(),
        },
    )
    .await
    .unwrap();
    match queued {
        AcquireResponse::Queued { reason, .. } => assert_eq!(reason, "Waiting for resources [a]"),
        AcquireResponse::Granted { .. } => panic!("expected queued"),
    }

    let snapshot = pool_snapshot(&scheduler);
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.locked, 2);
    assert_eq!(snapshot.waiting, 1);

    let statuses = resource_statuses(&scheduler);
    assert_eq!(statuses[0].locked_by.as_deref(), Some("j1"));
    assert!(health(&scheduler).await.ok);
}

#[tokio::test]
async fn test_submit_acquire_unknown_resource() {
    let scheduler = scheduler();
    let err = submit_acquire(
        &scheduler,
        AcquireRequest {
            job: JobRef::new("j1", "p"),
            required: RequiredResources::named(["ghost"]),
            description: String::new(),
        },
    )
    .await
    .unwrap_err();
    assert!(err.contains("ghost"));
}
