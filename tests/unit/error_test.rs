//! Tests for error types

use prometheus_lockable_resources::core::{BlockReason, RequiredResources, SchedulerError};

#[test]
fn test_unknown_resource_error() {
    let err = SchedulerError::UnknownResource("rack-9".to_string());
    assert_eq!(format!("{}", err), "unknown resource: rack-9");
}

#[test]
fn test_registry_unavailable_error() {
    let err = SchedulerError::RegistryUnavailable("connection refused".to_string());
    assert_eq!(format!("{}", err), "registry unavailable: connection refused");
}

#[test]
fn test_persistence_error() {
    let err = SchedulerError::Persistence("disk full".to_string());
    assert_eq!(format!("{}", err), "persistence error: disk full");
}

#[test]
fn test_block_reasons() {
    assert_eq!(
        BlockReason::WaitingFor(RequiredResources::with_label("lab", 0)).to_string(),
        "Waiting for resources with label lab"
    );
    assert_eq!(
        BlockReason::RegistryUnhealthy("https://labs.example".into()).to_string(),
        "https://labs.example is not healthy."
    );
    assert!(BlockReason::RegistryMisconfigured.to_string().contains("misconfigured"));
}
