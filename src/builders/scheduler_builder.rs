//! Build an [`AdmissionScheduler`] from configuration and injected collaborators.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LabelMatchingConfig, RegistryConfig, SchedulerConfig, StoreBackendConfig};
use crate::core::{
    AdmissionScheduler, AuditSink, ExternalRegistry, JobDirectory, LabelMatcher, PersistedState,
    RefreshHandle, RegistrySync, Resource, ResourceDefinition, ResourcePool, SchedulerError, Spawn,
    StateStore, TemplateLabelMatcher, TokenLabelMatcher,
};
use crate::infra::{InMemoryStateStore, JsonFileStateStore};

/// Assembles a scheduler. The job directory is required; everything else
/// falls back to what the configuration selects.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    jobs: Option<Arc<dyn JobDirectory>>,
    registry: Option<Arc<dyn ExternalRegistry>>,
    store: Option<Arc<dyn StateStore>>,
    matcher: Option<Arc<dyn LabelMatcher>>,
    audit: Option<Box<dyn AuditSink>>,
}

impl SchedulerBuilder {
    /// Start from a configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            jobs: None,
            registry: None,
            store: None,
            matcher: None,
            audit: None,
        }
    }

    /// Job directory used for precedence and orphan detection.
    #[must_use]
    pub fn jobs(mut self, jobs: Arc<dyn JobDirectory>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Registry client; requires a `registry` section in the configuration.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn ExternalRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the configured state store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the configured label matcher.
    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn LabelMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate the configuration, restore persisted state, and build.
    pub fn build(self) -> Result<AdmissionScheduler, SchedulerError> {
        let cfg = self.config;
        cfg.validate()
            .map_err(|e| SchedulerError::ConfigurationInvalid(format!("config invalid: {e}")))?;

        let jobs = self.jobs.ok_or_else(|| {
            SchedulerError::ConfigurationInvalid("a job directory is required".into())
        })?;
        let store = match self.store {
            Some(store) => store,
            None => open_store(&cfg)?,
        };
        let persisted = store.load()?;
        if !persisted.waiting.is_empty() {
            tracing::info!(
                count = persisted.waiting.len(),
                "waiting contexts from the previous run cannot be resumed; callers must acquire again"
            );
        }

        let matcher = self.matcher.unwrap_or_else(|| match cfg.label_matching {
            LabelMatchingConfig::Token => Arc::new(TokenLabelMatcher) as Arc<dyn LabelMatcher>,
            LabelMatchingConfig::Template => Arc::new(TemplateLabelMatcher),
        });
        let pool = ResourcePool::with_matcher(restore_resources(&cfg, &persisted), matcher);

        let mut scheduler = AdmissionScheduler::new(pool, jobs, Arc::clone(&store))
            .with_default_owner(cfg.default_owner.clone())
            .with_inverse_precedence(cfg.inverse_precedence);

        match (&cfg.registry, self.registry) {
            (Some(registry_cfg), Some(client)) => {
                let sync = registry_sync(registry_cfg, client, store)
                    .with_outage_queue(persisted.outage_queue);
                scheduler = scheduler.with_registry(sync);
            }
            (Some(registry_cfg), None) => {
                return Err(SchedulerError::ConfigurationInvalid(format!(
                    "registry {} is configured but no client was provided",
                    registry_cfg.url
                )));
            }
            (None, Some(client)) => {
                return Err(SchedulerError::ConfigurationInvalid(format!(
                    "registry client for {} provided without a registry section",
                    client.endpoint()
                )));
            }
            (None, None) => {}
        }

        if let Some(audit) = self.audit {
            scheduler = scheduler.with_audit(audit);
        }
        tracing::info!(
            resources = scheduler.snapshot().len(),
            registry = cfg.registry.as_ref().map_or("-", |r| r.url.as_str()),
            "scheduler built"
        );
        Ok(scheduler)
    }

    /// Build, then start the registry refresh loop on `spawner` when
    /// `refresh_interval_ms` is configured. The handle is `None` otherwise.
    pub fn build_with_spawner<S: Spawn>(
        self,
        spawner: &S,
    ) -> Result<(Arc<AdmissionScheduler>, Option<RefreshHandle>), SchedulerError> {
        let interval_ms = self.config.refresh_interval_ms;
        let scheduler = Arc::new(self.build()?);
        let handle = interval_ms.map(|interval_ms| {
            tracing::info!(interval_ms, "starting registry refresh loop");
            scheduler.spawn_refresh_loop(spawner, Duration::from_millis(interval_ms))
        });
        Ok((scheduler, handle))
    }
}

/// Build a scheduler, creating the registry client from its configuration
/// section when one is present.
pub fn build_scheduler<FR>(
    cfg: &SchedulerConfig,
    jobs: Arc<dyn JobDirectory>,
    mut registry_factory: FR,
) -> Result<AdmissionScheduler, SchedulerError>
where
    FR: FnMut(&RegistryConfig) -> Result<Arc<dyn ExternalRegistry>, SchedulerError>,
{
    let mut builder = SchedulerBuilder::new(cfg.clone()).jobs(jobs);
    if let Some(registry_cfg) = &cfg.registry {
        builder = builder.registry(registry_factory(registry_cfg)?);
    }
    builder.build()
}

fn open_store(cfg: &SchedulerConfig) -> Result<Arc<dyn StateStore>, SchedulerError> {
    match (cfg.store, &cfg.state_file) {
        (StoreBackendConfig::InMemory, _) => Ok(Arc::new(InMemoryStateStore::new())),
        (StoreBackendConfig::File, Some(path)) => Ok(Arc::new(JsonFileStateStore::new(path)?)),
        (StoreBackendConfig::File, None) => Err(SchedulerError::ConfigurationInvalid(
            "state_file is required for the file store".into(),
        )),
    }
}

fn registry_sync(
    cfg: &RegistryConfig,
    client: Arc<dyn ExternalRegistry>,
    store: Arc<dyn StateStore>,
) -> RegistrySync {
    RegistrySync::new(client, Duration::from_millis(cfg.call_timeout_ms), store)
}

/// Configured resources, with reservations carried over from the last run,
/// followed by resources that were created at runtime.
fn restore_resources(cfg: &SchedulerConfig, persisted: &PersistedState) -> Vec<Resource> {
    let configured: BTreeSet<&str> = cfg.resources.iter().map(|d| d.name.as_str()).collect();
    let mut resources: Vec<Resource> = cfg
        .resources
        .iter()
        .map(|def| {
            let mut resource = def.to_resource();
            if resource.reserved_by.is_none() {
                resource.reserved_by = persisted
                    .resources
                    .iter()
                    .find(|p| p.name == def.name)
                    .and_then(|p| p.reserved_by.clone());
            }
            resource
        })
        .collect();
    resources.extend(
        persisted
            .resources
            .iter()
            .filter(|p| !configured.contains(p.name.as_str()))
            .map(ResourceDefinition::to_resource),
    );
    resources
}
