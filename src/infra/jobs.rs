//! In-memory job directory.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::JobDirectory;
use crate::util::clock::now_ms;

/// Tracks running jobs and their start times.
#[derive(Debug, Default)]
pub struct InMemoryJobDirectory {
    started: RwLock<HashMap<String, u128>>,
}

impl InMemoryJobDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `job` as started at `started_at_ms`.
    pub fn register_at(&self, job: impl Into<String>, started_at_ms: u128) {
        self.started.write().insert(job.into(), started_at_ms);
    }

    /// Record `job` as started now.
    pub fn register(&self, job: impl Into<String>) {
        self.register_at(job, now_ms());
    }

    /// Forget `job`; waiting contexts for it become orphans.
    pub fn remove(&self, job: &str) {
        self.started.write().remove(job);
    }
}

impl JobDirectory for InMemoryJobDirectory {
    fn started_at_ms(&self, job: &str) -> Option<u128> {
        self.started.read().get(job).copied()
    }
}
