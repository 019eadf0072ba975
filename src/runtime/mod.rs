//! Runtime adapters and API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{
    health, list_resources, pool_snapshot, resource_statuses, submit_acquire, AcquireRequest,
    AcquireResponse, Health, PoolSnapshot, ResourceStatus,
};
pub use tokio_spawner::TokioSpawner;
