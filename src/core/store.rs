//! Persisted scheduler state and the sink that stores it.

use serde::{Deserialize, Serialize};

use crate::core::{RequiredResources, Resource, SchedulerError};
use crate::util::serde::JobId;

/// Definition of a locally configured resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    /// Unique name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whitespace or comma separated labels.
    #[serde(default)]
    pub labels: String,
    /// Reservation owner carried across restarts.
    #[serde(default)]
    pub reserved_by: Option<String>,
}

impl ResourceDefinition {
    /// Create a definition with the given labels.
    pub fn new(name: impl Into<String>, labels: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            labels: labels.into(),
            reserved_by: None,
        }
    }

    /// Build the pool entry for this definition.
    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(self.name.clone())
            .with_description(self.description.clone())
            .with_labels(&self.labels);
        resource.reserved_by.clone_from(&self.reserved_by);
        resource
    }

    /// Definition of an existing local resource.
    pub fn from_resource(resource: &Resource) -> Self {
        Self {
            name: resource.name.clone(),
            description: resource.description.clone(),
            labels: resource.labels.iter().cloned().collect::<Vec<_>>().join(" "),
            reserved_by: resource.reserved_by.clone(),
        }
    }
}

/// Persisted form of a waiting context. Resumption handles are not persisted,
/// so these do not survive a restart as live waits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingDescriptor {
    /// Requirement the context was waiting for.
    pub required: RequiredResources,
    /// Human-readable description.
    pub description: String,
    /// Waiting job.
    pub job: JobId,
}

/// Everything the scheduler persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Local resource definitions in pool order.
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    /// Contexts waiting at the time of the last save.
    #[serde(default)]
    pub waiting: Vec<WaitingDescriptor>,
    /// Jobs whose registry release is pending replay.
    #[serde(default)]
    pub outage_queue: Vec<JobId>,
}

/// Persistence sink for scheduler state.
///
/// Pool state and the outage queue are saved independently because they are
/// owned by different components; implementations merge them into one record.
pub trait StateStore: Send + Sync {
    /// Load the last saved state, or the default if nothing was saved.
    fn load(&self) -> Result<PersistedState, SchedulerError>;
    /// Save local resources and waiting contexts.
    fn save_pool(
        &self,
        resources: Vec<ResourceDefinition>,
        waiting: Vec<WaitingDescriptor>,
    ) -> Result<(), SchedulerError>;
    /// Save the outage queue.
    fn save_outage_queue(&self, jobs: Vec<JobId>) -> Result<(), SchedulerError>;
}
