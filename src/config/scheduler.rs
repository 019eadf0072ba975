//! Scheduler configuration structures.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, ResourceDefinition, DEFAULT_OWNER};

/// Environment variable holding the path of the JSON configuration file.
pub const CONFIG_ENV_VAR: &str = "LOCKS_CONFIG";

/// State store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendConfig {
    /// In-memory store for development/testing.
    #[default]
    InMemory,
    /// JSON file store at `state_file`.
    File,
}

/// Label matching strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMatchingConfig {
    /// Plain label tokens.
    #[default]
    Token,
    /// Labels with `${param}` placeholders.
    Template,
}

/// External registry connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry, also shown in health messages.
    pub url: String,
    /// Timeout applied to every registry call, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

const fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Locally configured resources.
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    /// External registry, if remote resources are mirrored.
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    /// Where scheduler state is persisted.
    #[serde(default)]
    pub store: StoreBackendConfig,
    /// State file used by the file store.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    /// Label matching strategy.
    #[serde(default)]
    pub label_matching: LabelMatchingConfig,
    /// Owner recorded on registry reservations for jobs without a user.
    #[serde(default = "default_owner")]
    pub default_owner: String,
    /// Wake the most recently started job first on release.
    #[serde(default)]
    pub inverse_precedence: bool,
    /// Period of the background registry refresh, if enabled.
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            registry: None,
            store: StoreBackendConfig::default(),
            state_file: None,
            label_matching: LabelMatchingConfig::default(),
            default_owner: default_owner(),
            inverse_precedence: false,
            refresh_interval_ms: None,
        }
    }
}

impl RegistryConfig {
    /// Validate registry settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url must not be empty".into());
        }
        if self.call_timeout_ms == 0 {
            return Err("call_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate resource definitions and backend settings.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for resource in &self.resources {
            if resource.name.trim().is_empty() {
                return Err("resource names must not be empty".into());
            }
            if !seen.insert(resource.name.as_str()) {
                return Err(format!("duplicate resource name `{}`", resource.name));
            }
        }
        if let Some(registry) = &self.registry {
            registry
                .validate()
                .map_err(|e| format!("registry invalid: {e}"))?;
        }
        if self.store == StoreBackendConfig::File && self.state_file.is_none() {
            return Err("state_file is required for the file store".into());
        }
        if self.default_owner.trim().is_empty() {
            return Err("default_owner must not be empty".into());
        }
        if self.refresh_interval_ms == Some(0) {
            return Err("refresh_interval_ms must be greater than 0".into());
        }
        if self.refresh_interval_ms.is_some() && self.registry.is_none() {
            return Err("refresh_interval_ms requires a registry".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&raw).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
    }

    /// Load configuration from the file named by `LOCKS_CONFIG`, reading a
    /// `.env` file first if one exists.
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var(CONFIG_ENV_VAR)
            .with_context(|| format!("{CONFIG_ENV_VAR} is not set"))?;
        Self::from_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let cfg = SchedulerConfig::from_json_str(r#"{"resources":[{"name":"a","labels":"x y"}]}"#)
            .unwrap();
        assert_eq!(cfg.default_owner, DEFAULT_OWNER);
        assert_eq!(cfg.store, StoreBackendConfig::InMemory);
        assert_eq!(cfg.resources[0].to_resource().labels.len(), 2);
    }

    #[test]
    fn test_file_store_requires_path() {
        let cfg = SchedulerConfig {
            store: StoreBackendConfig::File,
            ..SchedulerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
