//! API-facing request/response models.

use serde::{Deserialize, Serialize};

use crate::core::{Acquisition, AdmissionScheduler, RequiredResources, Resource, ResourceState};
use crate::util::serde::{JobId, JobRef};

/// Acquisition request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireRequest {
    /// Job asking for resources.
    pub job: JobRef,
    /// What the job needs.
    pub required: RequiredResources,
    /// Text shown while the job waits.
    #[serde(default)]
    pub description: String,
}

/// Acquisition response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AcquireResponse {
    /// Resources were locked.
    Granted {
        /// Locked resource names.
        resources: Vec<String>,
    },
    /// The job is waiting.
    Queued {
        /// Context id that can be passed to `cancel_wait`.
        context: String,
        /// Human-readable reason.
        reason: String,
    },
}

/// Resource status row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// Resource name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Labels, sorted.
    pub labels: Vec<String>,
    /// Derived state.
    pub state: ResourceState,
    /// Lock owner.
    pub locked_by: Option<JobId>,
    /// Reservation owner.
    pub reserved_by: Option<String>,
    /// Project holding a queue claim.
    pub queued_by: Option<String>,
    /// Self link when mirrored from the registry.
    pub self_link: Option<String>,
}

impl From<&Resource> for ResourceStatus {
    fn from(r: &Resource) -> Self {
        Self {
            name: r.name.clone(),
            description: r.description.clone(),
            labels: r.labels.iter().cloned().collect(),
            state: r.state(),
            locked_by: r.locked_by.clone(),
            reserved_by: r.reserved_by.clone(),
            queued_by: r.queued_by.as_ref().map(|c| c.project.clone()),
            self_link: r.external.as_ref().map(|e| e.self_link.clone()),
        }
    }
}

/// Pool summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// All resources.
    pub total: usize,
    /// Free resources.
    pub free: usize,
    /// Locked resources.
    pub locked: usize,
    /// Reserved resources.
    pub reserved: usize,
    /// Queued resources.
    pub queued: usize,
    /// Waiting contexts.
    pub waiting: usize,
    /// Releases buffered during a registry outage.
    pub outage_queue: usize,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag; false only when a configured registry is unhealthy.
    pub ok: bool,
    /// Registry address, if configured.
    pub registry: Option<String>,
    /// Result of the registry health check.
    pub registry_healthy: Option<bool>,
}

/// Acquire resources and translate the outcome into a response.
pub async fn submit_acquire(
    scheduler: &AdmissionScheduler,
    req: AcquireRequest,
) -> Result<AcquireResponse, String> {
    let reason = format!("Waiting for {}", req.required);
    match scheduler
        .acquire(req.required, &req.job, req.description)
        .await
        .map_err(|e| e.to_string())?
    {
        Acquisition::Granted(resources) => Ok(AcquireResponse::Granted { resources }),
        Acquisition::Queued(ticket) => Ok(AcquireResponse::Queued {
            context: ticket.id().to_string(),
            reason,
        }),
    }
}

/// Status rows without contacting the registry.
pub fn resource_statuses(scheduler: &AdmissionScheduler) -> Vec<ResourceStatus> {
    scheduler.snapshot().iter().map(ResourceStatus::from).collect()
}

/// Status rows after a registry refresh.
pub async fn list_resources(scheduler: &AdmissionScheduler) -> Vec<ResourceStatus> {
    scheduler.list().await.iter().map(ResourceStatus::from).collect()
}

/// Count resources by state.
pub fn pool_snapshot(scheduler: &AdmissionScheduler) -> PoolSnapshot {
    let mut snapshot = PoolSnapshot {
        waiting: scheduler.waiting_len(),
        outage_queue: scheduler.registry().map_or(0, |s| s.outage_queue().len()),
        ..PoolSnapshot::default()
    };
    for resource in scheduler.snapshot() {
        snapshot.total += 1;
        match resource.state() {
            ResourceState::Free => snapshot.free += 1,
            ResourceState::Locked => snapshot.locked += 1,
            ResourceState::Reserved => snapshot.reserved += 1,
            ResourceState::Queued => snapshot.queued += 1,
        }
    }
    snapshot
}

/// Check registry health, if one is configured.
pub async fn health(scheduler: &AdmissionScheduler) -> Health {
    match scheduler.registry() {
        Some(sync) => {
            let healthy = sync.is_healthy().await;
            Health {
                ok: healthy,
                registry: Some(sync.endpoint().to_string()),
                registry_healthy: Some(healthy),
            }
        }
        None => Health {
            ok: true,
            registry: None,
            registry_healthy: None,
        },
    }
}
