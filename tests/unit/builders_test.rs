//! Tests for building a scheduler from configuration

use std::sync::Arc;
use std::time::Duration;

use prometheus_lockable_resources::builders::{build_scheduler, SchedulerBuilder};
use prometheus_lockable_resources::config::{LabelMatchingConfig, RegistryConfig, SchedulerConfig};
use prometheus_lockable_resources::core::{
    ExternalRegistry, PersistedState, RequiredResources, ResourceDefinition, SchedulerError,
    StateStore,
};
use prometheus_lockable_resources::infra::{InMemoryJobDirectory, InMemoryRegistry, InMemoryStateStore};
use prometheus_lockable_resources::runtime::TokioSpawner;
use prometheus_lockable_resources::util::serde::Params;

fn config() -> SchedulerConfig {
    SchedulerConfig {
        resources: vec![
            ResourceDefinition::new("rack-1", "rack rack-arm64"),
            ResourceDefinition::new("rack-2", "rack rack-x86"),
        ],
        ..SchedulerConfig::default()
    }
}

#[test]
fn test_build_requires_job_directory() {
    let result = SchedulerBuilder::new(config()).build();
    assert!(matches!(result, Err(SchedulerError::ConfigurationInvalid(_))));
}

#[test]
fn test_build_restores_reservations_and_runtime_resources() {
    let mut persisted_rack = ResourceDefinition::new("rack-1", "rack");
    persisted_rack.reserved_by = Some("ops".into());
    let store = Arc::new(InMemoryStateStore::with_state(PersistedState {
        resources: vec![persisted_rack, ResourceDefinition::new("rack-9", "rack")],
        ..PersistedState::default()
    }));

    let scheduler = SchedulerBuilder::new(config())
        .jobs(Arc::new(InMemoryJobDirectory::new()))
        .store(store)
        .build()
        .unwrap();

    let names: Vec<String> = scheduler.snapshot().into_iter().map(|r| r.name).collect();
    assert_eq!(names, ["rack-1", "rack-2", "rack-9"]);
    assert_eq!(scheduler.resource("rack-1").unwrap().reserved_by.as_deref(), Some("ops"));
    // Labels come from the configuration, not the saved copy.
    assert!(scheduler.resource("rack-1").unwrap().labels.contains("rack-arm64"));
}

#[test]
fn test_build_with_template_matcher() {
    let cfg = SchedulerConfig {
        label_matching: LabelMatchingConfig::Template,
        ..config()
    };
    let scheduler = SchedulerBuilder::new(cfg)
        .jobs(Arc::new(InMemoryJobDirectory::new()))
        .build()
        .unwrap();

    let mut params = Params::new();
    params.insert("arch".into(), "x86".into());
    let required = RequiredResources::with_label("rack-${arch}", 1).with_params(params);
    assert_eq!(
        scheduler.check_availability(&required, true, &[]),
        Some(vec!["rack-2".to_string()])
    );
}

#[test]
fn test_registry_section_and_client_must_match() {
    let cfg = SchedulerConfig {
        registry: Some(RegistryConfig {
            url: "mem://labs".into(),
            call_timeout_ms: 100,
        }),
        ..config()
    };
    let missing_client = SchedulerBuilder::new(cfg.clone())
        .jobs(Arc::new(InMemoryJobDirectory::new()))
        .build();
    assert!(matches!(missing_client, Err(SchedulerError::ConfigurationInvalid(_))));

    let stray_client = SchedulerBuilder::new(config())
        .jobs(Arc::new(InMemoryJobDirectory::new()))
        .registry(Arc::new(InMemoryRegistry::new("mem://labs")))
        .build();
    assert!(matches!(stray_client, Err(SchedulerError::ConfigurationInvalid(_))));

    let scheduler = build_scheduler(&cfg, Arc::new(InMemoryJobDirectory::new()), |registry_cfg| {
        Ok(Arc::new(InMemoryRegistry::new(registry_cfg.url.clone())) as Arc<dyn ExternalRegistry>)
    })
    .unwrap();
    assert_eq!(scheduler.registry().unwrap().endpoint(), "mem://labs");
}

#[test]
fn test_build_restores_outage_queue() {
    let store = Arc::new(InMemoryStateStore::with_state(PersistedState {
        outage_queue: vec!["job#4".into()],
        ..PersistedState::default()
    }));
    let cfg = SchedulerConfig {
        registry: Some(RegistryConfig {
            url: "mem://labs".into(),
            call_timeout_ms: 100,
        }),
        ..config()
    };
    let scheduler = SchedulerBuilder::new(cfg)
        .jobs(Arc::new(InMemoryJobDirectory::new()))
        .registry(Arc::new(InMemoryRegistry::new("mem://labs")))
        .store(store.clone())
        .build()
        .unwrap();
    assert_eq!(scheduler.registry().unwrap().outage_queue(), vec!["job#4".to_string()]);
    assert_eq!(store.load().unwrap().outage_queue.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_build_with_spawner_runs_configured_refresh() {
    let registry = Arc::new(InMemoryRegistry::new("mem://labs"));
    let cfg = SchedulerConfig {
        registry: Some(RegistryConfig {
            url: "mem://labs".into(),
            call_timeout_ms: 100,
        }),
        refresh_interval_ms: Some(10),
        ..config()
    };
    let (scheduler, handle) = SchedulerBuilder::new(cfg)
        .jobs(Arc::new(InMemoryJobDirectory::new()))
        .registry(registry.clone())
        .build_with_spawner(&TokioSpawner::current().unwrap())
        .unwrap();
    let handle = handle.expect("refresh loop started");

    registry.add("/labs/1", "lab-1", &["lab"]);
    let mut seen = false;
    for _ in 0..100 {
        if scheduler.resource("lab-1").is_some() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop();
    assert!(seen, "refresh loop never merged the new lab");
}

#[tokio::test]
async fn test_build_with_spawner_without_interval() {
    let (scheduler, handle) = SchedulerBuilder::new(config())
        .jobs(Arc::new(InMemoryJobDirectory::new()))
        .build_with_spawner(&TokioSpawner::current().unwrap())
        .unwrap();
    assert!(handle.is_none());
    assert_eq!(scheduler.snapshot().len(), 2);
}
