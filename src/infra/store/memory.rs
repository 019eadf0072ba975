//! In-memory state store.

use parking_lot::Mutex;

use crate::core::{PersistedState, ResourceDefinition, SchedulerError, StateStore, WaitingDescriptor};
use crate::util::serde::JobId;

/// Keeps the last saved state in memory and counts saves.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<PersistedState>,
    saves: Mutex<usize>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with `state`.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    /// Last saved state.
    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().clone()
    }

    /// Number of saves performed.
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self) -> Result<PersistedState, SchedulerError> {
        Ok(self.snapshot())
    }

    fn save_pool(
        &self,
        resources: Vec<ResourceDefinition>,
        waiting: Vec<WaitingDescriptor>,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        state.resources = resources;
        state.waiting = waiting;
        *self.saves.lock() += 1;
        Ok(())
    }

    fn save_outage_queue(&self, jobs: Vec<JobId>) -> Result<(), SchedulerError> {
        self.state.lock().outage_queue = jobs;
        *self.saves.lock() += 1;
        Ok(())
    }
}
