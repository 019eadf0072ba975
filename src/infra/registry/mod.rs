//! Registry clients.

pub mod memory;

pub use memory::InMemoryRegistry;
