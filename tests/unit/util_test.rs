//! Tests for utility functions

use prometheus_lockable_resources::util::{now_ms, JobRef, Params, QueueItemId};

#[test]
fn test_job_ref() {
    let job = JobRef::new("deploy#3", "deploy").with_user("alice");
    assert_eq!(job.to_string(), "deploy#3");
    assert_eq!(job.project, "deploy");
    assert_eq!(job.user.as_deref(), Some("alice"));
}

#[test]
fn test_job_ref_serde_defaults_user() {
    let job: JobRef = serde_json::from_str(r#"{"id":"j1","project":"p"}"#).unwrap();
    assert_eq!(job, JobRef::new("j1", "p"));
}

#[test]
fn test_params_are_ordered() {
    let mut params = Params::new();
    params.insert("os".into(), "linux".into());
    params.insert("arch".into(), "arm64".into());
    let keys: Vec<&String> = params.keys().collect();
    assert_eq!(keys, ["arch", "os"]);
}

#[test]
fn test_clock_and_ids() {
    let id: QueueItemId = 12345;
    assert_eq!(id, 12345);
    assert!(now_ms() > 0);
}

#[test]
fn test_init_tracing_is_idempotent() {
    prometheus_lockable_resources::util::init_tracing();
    prometheus_lockable_resources::util::init_tracing();
    tracing::info!("tracing initialized twice without panicking");
}
