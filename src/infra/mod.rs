//! Infrastructure adapters for state stores, registries, and job directories.

pub mod jobs;
pub mod registry;
pub mod store;

pub use jobs::InMemoryJobDirectory;
pub use registry::InMemoryRegistry;
pub use store::{InMemoryStateStore, JsonFileStateStore};
