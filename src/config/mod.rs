//! Configuration models for the resource pool, registry, and persistence.

pub mod scheduler;

pub use scheduler::{
    LabelMatchingConfig, RegistryConfig, SchedulerConfig, StoreBackendConfig, CONFIG_ENV_VAR,
};
