//! Core admission abstractions: resources, requirements, the pool, the wait
//! queue, the scheduler, and registry mirroring.

pub mod audit;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod requirement;
pub mod resource;
pub mod resource_pool;
pub mod scheduler;
pub mod store;
pub mod wait_queue;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, BlockReason, SchedulerError};
pub use lifecycle::{QueueItem, RefreshHandle, Spawn};
pub use registry::{ExternalRegistry, MirrorOp, RegistrySync, RemoteResource};
pub use requirement::{LabelMatcher, PredicateLabelMatcher, RequiredResources, TemplateLabelMatcher, TokenLabelMatcher};
pub use resource::{parse_labels, ExternalOrigin, QueueClaim, RemoteReservation, Resource, ResourceState};
pub use resource_pool::ResourcePool;
pub use scheduler::{Acquisition, AdmissionScheduler, DEFAULT_OWNER};
pub use store::{PersistedState, ResourceDefinition, StateStore, WaitingDescriptor};
pub use wait_queue::{resume_channel, ContextId, Grant, JobDirectory, ResumeHandle, WaitQueue, WaitTicket, WaitingContext};
