//! Tests for configuration validation

use prometheus_lockable_resources::config::{
    LabelMatchingConfig, RegistryConfig, SchedulerConfig, StoreBackendConfig, CONFIG_ENV_VAR,
};
use prometheus_lockable_resources::core::ResourceDefinition;

#[test]
fn test_scheduler_config_validation() {
    let valid = SchedulerConfig {
        resources: vec![
            ResourceDefinition::new("rack-1", "rack x86"),
            ResourceDefinition::new("rack-2", "rack arm"),
        ],
        ..SchedulerConfig::default()
    };
    assert!(valid.validate().is_ok());

    let duplicate = SchedulerConfig {
        resources: vec![
            ResourceDefinition::new("rack-1", "rack"),
            ResourceDefinition::new("rack-1", "rack"),
        ],
        ..SchedulerConfig::default()
    };
    assert!(duplicate.validate().is_err());

    let unnamed = SchedulerConfig {
        resources: vec![ResourceDefinition::new(" ", "rack")],
        ..SchedulerConfig::default()
    };
    assert!(unnamed.validate().is_err());
}

#[test]
fn test_registry_config_validation() {
    let mut cfg = SchedulerConfig {
        registry: Some(RegistryConfig {
            url: "https://labs.example".into(),
            call_timeout_ms: 0,
        }),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());

    cfg.registry = Some(RegistryConfig {
        url: "https://labs.example".into(),
        call_timeout_ms: 1_000,
    });
    cfg.refresh_interval_ms = Some(30_000);
    assert!(cfg.validate().is_ok());

    cfg.registry = None;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "resources": [{ "name": "lab-1", "labels": "lab,x86", "description": "bench lab" }],
        "registry": { "url": "https://labs.example" },
        "store": "file",
        "state_file": "/tmp/locks.json",
        "label_matching": "template",
        "inverse_precedence": true
    }"#;

    let cfg = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.resources.len(), 1);
    assert_eq!(cfg.store, StoreBackendConfig::File);
    assert_eq!(cfg.label_matching, LabelMatchingConfig::Template);
    assert_eq!(cfg.registry.as_ref().unwrap().call_timeout_ms, 5_000);
    assert!(cfg.inverse_precedence);
}

#[test]
fn test_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str("{ not json").is_err());
    assert!(SchedulerConfig::from_json_str(r#"{"store":"file"}"#).is_err());
}

#[test]
fn test_config_from_file() {
    let dir = std::env::temp_dir().join(format!("lockable-config-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("locks.json");
    std::fs::write(&path, r#"{"resources":[{"name":"a"}]}"#).unwrap();

    let cfg = SchedulerConfig::from_file(&path).unwrap();
    assert_eq!(cfg.resources[0].name, "a");
    assert!(SchedulerConfig::from_file(dir.join("missing.json")).is_err());
    assert_eq!(CONFIG_ENV_VAR, "LOCKS_CONFIG");
    let _ = std::fs::remove_dir_all(dir);
}

static ENV_GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[test]
fn test_config_from_env() {
    let _serial = ENV_GUARD.lock().unwrap_or_else(|e| e.into_inner());
    let dir = std::env::temp_dir().join(format!("lockable-env-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("locks.json");
    std::fs::write(
        &path,
        r#"{"resources":[{"name":"rack-1","labels":"rack"}],"default_owner":"ci"}"#,
    )
    .unwrap();

    std::env::set_var(CONFIG_ENV_VAR, &path);
    let cfg = SchedulerConfig::from_env().unwrap();
    assert_eq!(cfg.resources[0].name, "rack-1");
    assert_eq!(cfg.default_owner, "ci");

    std::env::set_var(CONFIG_ENV_VAR, dir.join("missing.json"));
    assert!(SchedulerConfig::from_env().is_err());

    std::env::remove_var(CONFIG_ENV_VAR);
    let err = SchedulerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains(CONFIG_ENV_VAR));
    let _ = std::fs::remove_dir_all(dir);
}
