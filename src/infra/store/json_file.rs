//! File-backed state store.
//!
//! The whole [`PersistedState`] is written as one JSON document. Writes go to
//! a sibling temporary file that is renamed over the target, so a crash never
//! leaves a half-written state file behind.

use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::{PersistedState, ResourceDefinition, SchedulerError, StateStore, WaitingDescriptor};
use crate::util::serde::JobId;

/// JSON file store with an in-memory cache of the last written state.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    cache: Mutex<PersistedState>,
}

fn persistence(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Persistence(e.to_string())
}

impl JsonFileStateStore {
    /// Open (or prepare to create) the state file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(persistence)?;
        }
        let cache = Self::read(&path)?;
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<PersistedState, SchedulerError> {
        if !path.exists() {
            return Ok(PersistedState::default());
        }
        let raw = std::fs::read_to_string(path).map_err(persistence)?;
        if raw.trim().is_empty() {
            return Ok(PersistedState::default());
        }
        serde_json::from_str(&raw).map_err(persistence)
    }

    fn write(&self, state: &PersistedState) -> Result<(), SchedulerError> {
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(state).map_err(persistence)?;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(persistence)?;
        file.write_all(body.as_bytes()).map_err(persistence)?;
        file.sync_all().map_err(persistence)?;
        std::fs::rename(&tmp, &self.path).map_err(persistence)
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self) -> Result<PersistedState, SchedulerError> {
        let state = Self::read(&self.path)?;
        self.cache.lock().clone_from(&state);
        Ok(state)
    }

    fn save_pool(
        &self,
        resources: Vec<ResourceDefinition>,
        waiting: Vec<WaitingDescriptor>,
    ) -> Result<(), SchedulerError> {
        let mut cache = self.cache.lock();
        cache.resources = resources;
        cache.waiting = waiting;
        self.write(&cache)
    }

    fn save_outage_queue(&self, jobs: Vec<JobId>) -> Result<(), SchedulerError> {
        let mut cache = self.cache.lock();
        cache.outage_queue = jobs;
        self.write(&cache)
    }
}
