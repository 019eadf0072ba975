//! # Prometheus Lockable Resources
//!
//! Admission and locking of named, labeled, exclusive-use resources for a
//! build/job scheduler.
//!
//! Jobs compete for a finite pool of resources such as hardware racks, test
//! labs, or licenses. A job asks for specific resources by name, or for any N
//! resources carrying a label. A resource is never held by two jobs at once.
//!
//! ## Core Problem Solved
//!
//! - **Atomic multi-resource admission**: a job gets every resource it asked
//!   for or none of them.
//! - **Fair hand-over**: released resources go straight to the next waiting
//!   job that can use them, first-come-first-served or newest-first.
//! - **Remote resources**: resources owned by an external registry are
//!   mirrored into the pool, and local locks are written back as remote
//!   reservations. The registry may be down; releases made during an outage
//!   are replayed once it recovers.
//!
//! ## Key Features
//!
//! - **Resource state machine**: free, queued, locked, reserved
//! - **Single serialization point**: every decision runs under one
//!   `parking_lot::RwLock` write guard
//! - **Suspended waits**: waiting callers hold a one-shot ticket and never hold
//!   the admission lock
//! - **Pluggable label matching**: plain tokens, `${param}` templates, or any
//!   predicate
//! - **Persistence**: local definitions, reservations, and the outage queue
//!   survive restarts
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_lockable_resources::builders::SchedulerBuilder;
//! use prometheus_lockable_resources::config::SchedulerConfig;
//! use prometheus_lockable_resources::core::{Acquisition, RequiredResources};
//! use prometheus_lockable_resources::infra::InMemoryJobDirectory;
//! use prometheus_lockable_resources::util::serde::JobRef;
//!
//! let cfg = SchedulerConfig::from_json_str(r#"{"resources":[{"name":"rack-1","labels":"rack"}]}"#)?;
//! let jobs = Arc::new(InMemoryJobDirectory::new());
//! let scheduler = SchedulerBuilder::new(cfg).jobs(jobs.clone()).build()?;
//!
//! jobs.register("deploy#7");
//! let job = JobRef::new("deploy#7", "deploy");
//! match scheduler.acquire(RequiredResources::with_label("rack", 1), &job, "deploy").await? {
//!     Acquisition::Granted(names) => println!("running on {names:?}"),
//!     Acquisition::Queued(ticket) => {
//!         let grant = ticket.granted().await?;
//!         println!("running on {:?}", grant.resources);
//!     }
//! }
//! scheduler.on_completed("deploy#7").await;
//! ```
//!
//! For complete examples, see `tests/admission_test.rs` and
//! `tests/registry_sync_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core admission abstractions: resources, pool, wait queue, scheduler.
pub mod core;
/// Configuration models for resources, registry, and persistence.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters for state stores, registries, and job directories.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
