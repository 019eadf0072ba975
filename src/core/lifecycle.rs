//! Job lifecycle hooks called by the external job runner.
//!
//! The runner asks [`AdmissionScheduler::can_run`] before dispatching a queued
//! item, then reports start, completion, and deletion. These hooks tie the
//! queue-claim path to the lock path and drive the opportunistic registry
//! health check.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{AdmissionScheduler, BlockReason, QueueClaim, RequiredResources, SchedulerError};
use crate::util::serde::{JobRef, QueueItemId};

/// Spawn abstraction so the refresh loop can run on any executor.
pub trait Spawn {
    /// Spawn an async task that returns a future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// A pending item in the runner's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue item identifier.
    pub id: QueueItemId,
    /// Project the item will run.
    pub project: String,
    /// Resources the project requires.
    pub required: RequiredResources,
}

impl AdmissionScheduler {
    /// Decide whether a queued item may be dispatched, claiming its
    /// resources if so. Returns the reason it must keep waiting otherwise.
    pub async fn can_run(&self, item: &QueueItem) -> Option<BlockReason> {
        let required = &item.required;
        if required.is_empty() {
            return None;
        }

        if required.names.iter().any(|n| !self.is_local(n)) {
            let Some(sync) = self.registry() else {
                return Some(BlockReason::RegistryMisconfigured);
            };
            if !sync.is_healthy().await {
                return Some(BlockReason::RegistryUnhealthy(sync.endpoint().to_string()));
            }
        }

        self.refresh().await;
        if let Some(unknown) = required.names.iter().find(|n| self.resource(n).is_none()) {
            return Some(BlockReason::UnknownResource(unknown.clone()));
        }

        let claim = QueueClaim::new(item.id, item.project.clone());
        let queued = if required.is_counted() {
            self.queue_by_label(required, &claim).map(|names| names.is_some())
        } else {
            self.queue(&required.names, &claim)
        };
        match queued {
            Ok(true) => None,
            Ok(false) => Some(BlockReason::WaitingFor(required.clone())),
            Err(SchedulerError::UnknownResource(name)) => Some(BlockReason::UnknownResource(name)),
            Err(e) => {
                tracing::warn!(item = item.id, project = %item.project, "cannot admit item: {e}");
                Some(BlockReason::WaitingFor(required.clone()))
            }
        }
    }

    /// Lock the resources claimed for a job that just started.
    ///
    /// Label requirements lock what the project claimed in [`can_run`](Self::can_run);
    /// named requirements lock the names directly.
    pub async fn on_started(&self, job: &JobRef, required: &RequiredResources) -> Option<Vec<String>> {
        let names = if required.is_counted() {
            self.resources_for_project(&job.project)
        } else {
            required.names.clone()
        };
        if names.is_empty() {
            return None;
        }
        if self.lock(&names, job, None).await {
            Some(names)
        } else {
            tracing::warn!(job = %job, "could not lock {names:?} at job start");
            None
        }
    }

    /// Release everything `job` holds, then check the registry and replay
    /// buffered releases if it has recovered.
    pub async fn on_completed(&self, job: &str) {
        self.release_all(job).await;
        if let Some(sync) = self.registry() {
            sync.on_job_completed(job).await;
        }
    }

    /// Release everything a deleted job holds.
    pub async fn on_deleted(&self, job: &str) {
        self.release_all(job).await;
    }

    async fn release_all(&self, job: &str) {
        let held = self.resources_for_job(job);
        if !held.is_empty() {
            self.release(&held, job).await;
        }
    }

    /// Merge the registry listing every `interval` until the handle is stopped.
    pub fn spawn_refresh_loop<S: Spawn>(self: &Arc<Self>, spawner: &S, interval: Duration) -> RefreshHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let scheduler = Arc::clone(self);
        let flag = Arc::clone(&stop);
        spawner.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                scheduler.refresh().await;
            }
            tracing::debug!("registry refresh loop stopped");
        });
        RefreshHandle { stop }
    }
}

/// Stops a refresh loop started by [`AdmissionScheduler::spawn_refresh_loop`].
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    stop: Arc<AtomicBool>,
}

impl RefreshHandle {
    /// Ask the loop to exit after its current sleep.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// True once [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}
