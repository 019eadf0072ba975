//! Mirroring of an external resource registry and outage replay.
//!
//! The registry is the system of record for remote resources ("labs"). Each
//! pool listing merges the remote view into the pool; local locks and
//! reservations on mirrored resources are written back as remote reservation
//! records. The registry may be unreachable: writes then fail soft, the local
//! state stays authoritative, and releases that could not be confirmed are
//! buffered in an outage queue that is replayed once the registry is healthy.
//!
//! Writes are staged in admission order while the admission lock is held and
//! sent one at a time behind an async gate, so a slow release can never land
//! after the reservation that replaced it.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::store::StateStore;
use crate::core::{
    parse_labels, ExternalOrigin, RemoteReservation, Resource, ResourcePool, SchedulerError,
};
use crate::util::serde::JobId;

/// A resource as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// Stable link identifying the remote object.
    pub self_link: String,
    /// Resource name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Tags, used as labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Reservation currently held on the object.
    #[serde(default)]
    pub active_reservation: Option<RemoteReservation>,
}

/// Client contract for the external registry.
#[async_trait]
pub trait ExternalRegistry: Send + Sync {
    /// Address shown in diagnostics.
    fn endpoint(&self) -> &str;

    /// List every remote resource with its active reservation.
    async fn list_resources(&self) -> Result<Vec<RemoteResource>, SchedulerError>;

    /// Create a reservation record on `resource_ref`.
    async fn create_reservation(
        &self,
        resource_ref: &str,
        owner: &str,
        build_ref: Option<&str>,
        indefinite: bool,
    ) -> Result<(), SchedulerError>;

    /// Delete the active reservation on `resource_ref`.
    async fn delete_reservation(&self, resource_ref: &str) -> Result<(), SchedulerError>;

    /// Return true if the registry is reachable and healthy.
    async fn health_check(&self) -> bool;
}

/// A write against the registry, staged under the admission lock and sent
/// after it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOp {
    /// Create a reservation for a local lock or reservation.
    Create {
        /// Remote object.
        self_link: String,
        /// Reservation owner.
        owner: String,
        /// Job holding the lock, absent for manual reservations.
        build_ref: Option<JobId>,
        /// Lock reservations have no end date.
        indefinite: bool,
    },
    /// Delete the reservation after a release.
    Delete {
        /// Remote object.
        self_link: String,
        /// Job whose release this is; buffered for replay on failure.
        job: Option<JobId>,
    },
}

/// Keeps the pool and the registry in step.
pub struct RegistrySync {
    client: Arc<dyn ExternalRegistry>,
    call_timeout: Duration,
    outage: Mutex<VecDeque<JobId>>,
    pending: Mutex<VecDeque<MirrorOp>>,
    gate: tokio::sync::Mutex<()>,
    store: Arc<dyn StateStore>,
}

impl RegistrySync {
    /// Create a sync layer around a registry client.
    pub fn new(
        client: Arc<dyn ExternalRegistry>,
        call_timeout: Duration,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            client,
            call_timeout,
            outage: Mutex::new(VecDeque::new()),
            pending: Mutex::new(VecDeque::new()),
            gate: tokio::sync::Mutex::new(()),
            store,
        }
    }

    /// Restore a persisted outage queue.
    #[must_use]
    pub fn with_outage_queue(self, jobs: Vec<JobId>) -> Self {
        *self.outage.lock() = jobs.into();
        self
    }

    /// Registry address.
    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    /// Jobs whose release is waiting for replay.
    pub fn outage_queue(&self) -> Vec<JobId> {
        self.outage.lock().iter().cloned().collect()
    }

    async fn call<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, SchedulerError>> + Send,
    ) -> Result<T, SchedulerError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| SchedulerError::RegistryUnavailable(format!("{what} timed out")))?
    }

    /// Check registry health. Errors and timeouts count as unhealthy.
    pub async fn is_healthy(&self) -> bool {
        match tokio::time::timeout(self.call_timeout, self.client.health_check()).await {
            Ok(healthy) => {
                tracing::debug!(endpoint = self.endpoint(), healthy, "registry health check");
                healthy
            }
            Err(_) => {
                tracing::debug!(endpoint = self.endpoint(), "registry health check timed out");
                false
            }
        }
    }

    /// Fetch the remote listing, or `None` if the registry is unreachable.
    pub async fn fetch(&self) -> Option<Vec<RemoteResource>> {
        match self.call("list resources", self.client.list_resources()).await {
            Ok(listing) => Some(listing),
            Err(e) => {
                tracing::warn!(endpoint = self.endpoint(), "keeping last known registry state: {e}");
                None
            }
        }
    }

    /// Merge a remote listing into the pool. Returns the names whose adopted
    /// remote hold disappeared, so waiting contexts can be offered them.
    ///
    /// Duplicate self links keep the last listed entry. Remote names that
    /// shadow a local resource are skipped and reported through
    /// [`ResourcePool::name_collisions`].
    pub fn merge(pool: &mut ResourcePool, listing: Vec<RemoteResource>) -> Vec<String> {
        let mut remotes: Vec<RemoteResource> = Vec::with_capacity(listing.len());
        for remote in listing {
            remotes.retain(|r| r.self_link != remote.self_link);
            remotes.push(remote);
        }

        pool.retain_external(|r| {
            let keep = r
                .external
                .as_ref()
                .is_some_and(|e| remotes.iter().any(|x| x.self_link == e.self_link));
            if !keep && r.is_locked() {
                tracing::warn!(resource = %r.name, "remote resource vanished while locked");
            }
            keep
        });

        let mut collisions = BTreeSet::new();
        let mut cleared = Vec::new();
        for remote in &remotes {
            if pool.is_local(&remote.name) {
                tracing::warn!(
                    resource = %remote.name,
                    self_link = %remote.self_link,
                    "registry resource shadowed by a local resource with the same name"
                );
                collisions.insert(remote.name.clone());
                continue;
            }
            let existing = pool.external_mut().find(|r| {
                r.external
                    .as_ref()
                    .is_some_and(|e| e.self_link == remote.self_link)
            });
            if let Some(existing) = existing {
                if apply_remote(existing, remote) {
                    cleared.push(existing.name.clone());
                }
                continue;
            }
            let mut resource = Resource::new(remote.name.clone());
            resource.external = Some(ExternalOrigin {
                self_link: remote.self_link.clone(),
                reservation: None,
                adopted: false,
                released: None,
            });
            apply_remote(&mut resource, remote);
            if !pool.insert(resource) {
                tracing::warn!(resource = %remote.name, "duplicate registry resource name");
                collisions.insert(remote.name.clone());
            }
        }
        pool.set_collisions(collisions);
        cleared
    }

    /// Queue writes behind those already staged. Call while the admission
    /// lock is held so the queue follows admission order.
    pub fn stage(&self, ops: Vec<MirrorOp>) {
        if !ops.is_empty() {
            self.pending.lock().extend(ops);
        }
    }

    /// Writes staged but not yet sent.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send staged writes oldest first, one at a time. Every write staged
    /// before the call has been sent when it returns.
    pub async fn flush(&self) {
        let _gate = self.gate.lock().await;
        loop {
            let next = self.pending.lock().pop_front();
            let Some(op) = next else {
                break;
            };
            self.send(op).await;
        }
    }

    /// Failures never propagate; failed releases are buffered for replay.
    async fn send(&self, op: MirrorOp) {
        match op {
            MirrorOp::Create {
                self_link,
                owner,
                build_ref,
                indefinite,
            } => {
                let fut = self.client.create_reservation(
                    &self_link,
                    &owner,
                    build_ref.as_deref(),
                    indefinite,
                );
                if let Err(e) = self.call("create reservation", fut).await {
                    tracing::warn!(%self_link, %owner, "mirror reservation not created: {e}");
                }
            }
            MirrorOp::Delete { self_link, job } => {
                let fut = self.client.delete_reservation(&self_link);
                if let Err(e) = self.call("delete reservation", fut).await {
                    tracing::warn!(%self_link, "mirror release failed: {e}");
                    if let Some(job) = job {
                        self.record_outage(job);
                    }
                }
            }
        }
    }

    /// Buffer a job whose release could not be confirmed.
    pub fn record_outage(&self, job: JobId) {
        let snapshot = {
            let mut queue = self.outage.lock();
            if queue.contains(&job) {
                return;
            }
            tracing::info!(%job, "buffering registry release until the registry recovers");
            queue.push_back(job);
            queue.iter().cloned().collect::<Vec<_>>()
        };
        self.persist(snapshot);
    }

    fn persist(&self, jobs: Vec<JobId>) {
        if let Err(e) = self.store.save_outage_queue(jobs) {
            tracing::error!("failed to persist outage queue: {e}");
        }
    }

    /// Opportunistic health check run when a job completes: buffers the job
    /// while the registry is down, and replays the outage queue once it is up.
    pub async fn on_job_completed(&self, job: &str) {
        if !self.is_healthy().await {
            tracing::debug!(endpoint = self.endpoint(), "registry is not healthy");
            self.record_outage(job.to_string());
            return;
        }
        if !self.outage.lock().is_empty() {
            tracing::debug!(endpoint = self.endpoint(), "registry healthy, replaying outage queue");
            self.replay_outage_queue().await;
        }
    }

    /// Replay every buffered release. Returns the number of reservations deleted.
    ///
    /// The queue is drained atomically so concurrent completions never replay
    /// the same job twice; jobs whose replay fails are put back.
    pub async fn replay_outage_queue(&self) -> usize {
        let pending: Vec<JobId> = self.outage.lock().drain(..).collect();
        if pending.is_empty() {
            return 0;
        }
        self.persist(self.outage_queue());

        let listing = match self.call("list resources", self.client.list_resources()).await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!("outage replay postponed: {e}");
                self.requeue(pending);
                return 0;
            }
        };

        let mut deleted = 0;
        let mut failed = Vec::new();
        for job in pending {
            let held = listing.iter().filter(|r| {
                r.active_reservation
                    .as_ref()
                    .and_then(|res| res.build_ref.as_deref())
                    == Some(job.as_str())
            });
            let mut ok = true;
            for remote in held {
                match self
                    .call("delete reservation", self.client.delete_reservation(&remote.self_link))
                    .await
                {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        tracing::warn!(%job, self_link = %remote.self_link, "replayed release failed: {e}");
                        ok = false;
                    }
                }
            }
            if ok {
                tracing::info!(%job, "replayed registry release");
            } else {
                failed.push(job);
            }
        }
        if !failed.is_empty() {
            self.requeue(failed);
        }
        deleted
    }

    fn requeue(&self, jobs: Vec<JobId>) {
        let snapshot = {
            let mut queue = self.outage.lock();
            for job in jobs.into_iter().rev() {
                if !queue.contains(&job) {
                    queue.push_front(job);
                }
            }
            queue.iter().cloned().collect::<Vec<_>>()
        };
        self.persist(snapshot);
    }
}

/// Fold one remote entry into its pool mirror. Local owners always win.
/// Returns true when an adopted remote hold was cleared.
fn apply_remote(resource: &mut Resource, remote: &RemoteResource) -> bool {
    resource.description.clone_from(&remote.description);
    resource.labels = parse_labels(&remote.labels.join(" "));
    let Some(origin) = resource.external.as_mut() else {
        return false;
    };

    let mut cleared = false;
    match &remote.active_reservation {
        Some(reservation) => match &reservation.build_ref {
            Some(build) if origin.released.as_deref() == Some(build.as_str()) => {
                // Released locally; the remote delete has not landed yet.
            }
            Some(build) => {
                if resource.locked_by.is_none() {
                    resource.locked_by = Some(build.clone());
                    origin.adopted = true;
                } else if resource.locked_by.as_deref() != Some(build.as_str()) {
                    tracing::debug!(resource = %resource.name, %build, "local lock differs from registry; keeping local");
                }
            }
            None => {
                if resource.reserved_by.is_none() && resource.locked_by.is_none() {
                    resource.reserved_by =
                        Some(reservation.owner.clone().unwrap_or_else(|| "external".into()));
                    origin.adopted = true;
                }
            }
        },
        None => {
            if origin.adopted {
                resource.locked_by = None;
                resource.reserved_by = None;
                origin.adopted = false;
                cleared = true;
            }
            origin.released = None;
        }
    }
    origin.reservation.clone_from(&remote.active_reservation);
    cleared
}
