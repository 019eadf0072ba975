//! Admission scheduler: the single serialization point for every pool mutation.
//!
//! All state transitions happen under one `parking_lot::RwLock` write guard so
//! that admission decisions are totally ordered. Read-only queries share the
//! read side. Registry writes are staged while the guard is held and sent
//! after it is dropped; persistence is synchronous and happens under the guard
//! so that every save reflects a consistent snapshot.
//!
//! Whenever a resource becomes free, by release, unreservation, reset or a
//! vanished remote hold, waiting contexts are offered it before anyone else.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::registry::{MirrorOp, RegistrySync};
use crate::core::store::{ResourceDefinition, StateStore, WaitingDescriptor};
use crate::core::wait_queue::{resume_channel, ContextId, JobDirectory, WaitQueue, WaitTicket, WaitingContext};
use crate::core::{QueueClaim, RequiredResources, Resource, ResourcePool, SchedulerError};
use crate::util::serde::{JobId, JobRef};

/// Owner recorded on registry reservations when the job has no user.
pub const DEFAULT_OWNER: &str = "scheduler";

/// Outcome of [`AdmissionScheduler::acquire`].
#[derive(Debug)]
pub enum Acquisition {
    /// Resources were locked immediately.
    Granted(Vec<String>),
    /// The request is waiting; await the ticket for the grant.
    Queued(WaitTicket),
}

#[derive(Debug)]
struct SchedulerState {
    pool: ResourcePool,
    waiters: WaitQueue,
}

/// Serializes queue, lock, unlock, and reservation decisions over a resource pool.
pub struct AdmissionScheduler {
    state: RwLock<SchedulerState>,
    jobs: Arc<dyn JobDirectory>,
    store: Arc<dyn StateStore>,
    sync: Option<RegistrySync>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
    default_owner: String,
    inverse_precedence: bool,
}

impl AdmissionScheduler {
    /// Create a scheduler over `pool` with no registry attached.
    pub fn new(pool: ResourcePool, jobs: Arc<dyn JobDirectory>, store: Arc<dyn StateStore>) -> Self {
        Self {
            state: RwLock::new(SchedulerState {
                pool,
                waiters: WaitQueue::new(),
            }),
            jobs,
            store,
            sync: None,
            audit: None,
            default_owner: DEFAULT_OWNER.to_string(),
            inverse_precedence: false,
        }
    }

    /// Mirror resources from an external registry.
    #[must_use]
    pub fn with_registry(mut self, sync: RegistrySync) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Owner used for registry reservations when a job has no user.
    #[must_use]
    pub fn with_default_owner(mut self, owner: impl Into<String>) -> Self {
        self.default_owner = owner.into();
        self
    }

    /// Wake order used by [`release`](Self::release).
    #[must_use]
    pub const fn with_inverse_precedence(mut self, inverse: bool) -> Self {
        self.inverse_precedence = inverse;
        self
    }

    /// Registry sync layer, if one is attached.
    pub const fn registry(&self) -> Option<&RegistrySync> {
        self.sync.as_ref()
    }

    /// True when releases wake the most recently started job first.
    pub const fn inverse_precedence(&self) -> bool {
        self.inverse_precedence
    }

    // ---- queries ----

    /// Merge the latest registry listing into the pool. Failures keep the
    /// last known state.
    pub async fn refresh(&self) {
        let Some(sync) = &self.sync else {
            return;
        };
        let Some(listing) = sync.fetch().await else {
            return;
        };
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let cleared = RegistrySync::merge(&mut state.pool, listing);
            if cleared.is_empty() {
                return;
            }
            tracing::info!("remote holds cleared on {cleared:?}");
            let mut ops = Vec::new();
            self.dispatch(state, cleared, None, self.inverse_precedence, &mut ops);
            self.persist(state);
            self.stage(ops);
        }
        self.flush().await;
    }

    /// Refresh from the registry, then return every resource.
    pub async fn list(&self) -> Vec<Resource> {
        self.refresh().await;
        self.snapshot()
    }

    /// Every resource as currently known, without contacting the registry.
    pub fn snapshot(&self) -> Vec<Resource> {
        self.state.read().pool.list().to_vec()
    }

    /// Look up one resource.
    pub fn resource(&self, name: &str) -> Option<Resource> {
        self.state.read().pool.by_name(name).cloned()
    }

    /// True when `name` is configured locally.
    pub fn is_local(&self, name: &str) -> bool {
        self.state.read().pool.is_local(name)
    }

    /// Free resources carrying `label`.
    pub fn free_count_for_label(&self, label: &str) -> usize {
        self.state.read().pool.free_count_for_label(label)
    }

    /// Every label known to the pool.
    pub fn all_labels(&self) -> BTreeSet<String> {
        self.state.read().pool.all_labels()
    }

    /// Names locked by `job`.
    pub fn resources_for_job(&self, job: &str) -> Vec<String> {
        resource_names(self.state.read().pool.for_job(job))
    }

    /// Names queued by `project`.
    pub fn resources_for_project(&self, project: &str) -> Vec<String> {
        resource_names(self.state.read().pool.for_project(project))
    }

    /// Remote names shadowed by local resources.
    pub fn name_collisions(&self) -> BTreeSet<String> {
        self.state.read().pool.name_collisions().clone()
    }

    /// Persisted form of the contexts currently waiting.
    pub fn waiting(&self) -> Vec<WaitingDescriptor> {
        self.state.read().waiters.descriptors()
    }

    /// Number of waiting contexts.
    pub fn waiting_len(&self) -> usize {
        self.state.read().waiters.len()
    }

    /// Check a requirement against the current pool without changing it.
    pub fn check_availability(
        &self,
        required: &RequiredResources,
        exclude_reserved: bool,
        about_to_free: &[String],
    ) -> Option<Vec<String>> {
        self.state
            .read()
            .pool
            .check_availability(required, exclude_reserved, about_to_free)
    }

    // ---- queue claims ----

    /// Claim every named resource for a pending item. All-or-nothing.
    ///
    /// Succeeds only if no resource is reserved, locked, or claimed by a
    /// different item.
    pub fn queue(&self, names: &[String], claim: &QueueClaim) -> Result<bool, SchedulerError> {
        let mut state = self.state.write();
        state.pool.require_all(names)?;
        let blocked = names.iter().filter_map(|n| state.pool.by_name(n)).any(|r| {
            r.is_reserved() || r.is_locked() || r.is_queued_by_other(claim.item_id)
        });
        if blocked {
            tracing::debug!(item = claim.item_id, "resources {names:?} not free to queue");
            return Ok(false);
        }
        for name in names {
            if let Some(r) = state.pool.by_name_mut(name) {
                r.queued_by = Some(claim.clone());
            }
        }
        drop(state);
        tracing::debug!(item = claim.item_id, project = %claim.project, "queued {names:?}");
        self.record(&claim.project, names, "queue", None);
        Ok(true)
    }

    /// Claim resources by label for a pending item.
    ///
    /// Claims already held by the same item are reused. A different item of
    /// the same project holding claims blocks this one. If not enough free
    /// resources exist, every claim of the project is dropped. A count of
    /// zero over a label nothing carries is admitted with no resources.
    pub fn queue_by_label(
        &self,
        required: &RequiredResources,
        claim: &QueueClaim,
    ) -> Result<Option<Vec<String>>, SchedulerError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.pool.validate(required)?;

        let candidates = resource_names(state.pool.candidates(required));
        let mut selected: Vec<String> = Vec::new();
        for r in state.pool.list() {
            let Some(existing) = r.queued_by.as_ref().filter(|c| c.project == claim.project) else {
                continue;
            };
            if existing.item_id != claim.item_id {
                tracing::debug!(project = %claim.project, "another instance of the project is pending");
                return Ok(None);
            }
            if candidates.contains(&r.name) {
                selected.push(r.name.clone());
            }
        }

        let wanted = if required.count == 0 {
            candidates.len()
        } else {
            required.count
        };
        selected.truncate(wanted);
        for name in &candidates {
            if selected.len() >= wanted {
                break;
            }
            if !selected.contains(name) && state.pool.by_name(name).is_some_and(Resource::is_free) {
                selected.push(name.clone());
            }
        }

        if selected.len() < wanted {
            let claimed = resource_names(state.pool.for_project(&claim.project));
            for name in &claimed {
                if let Some(r) = state.pool.by_name_mut(name) {
                    r.unqueue();
                }
            }
            tracing::debug!(project = %claim.project, found = selected.len(), wanted, "not enough free {required}");
            return Ok(None);
        }

        for name in &selected {
            if let Some(r) = state.pool.by_name_mut(name) {
                r.queued_by = Some(claim.clone());
            }
        }
        drop(guard);
        self.record(&claim.project, &selected, "queue", None);
        Ok(Some(selected))
    }

    // ---- lock / unlock ----

    /// Lock `names` for `job`, resolving `resume` with the names on success.
    /// If the waiter behind `resume` has gone away the lock is released again
    /// and the call returns false.
    ///
    /// Denied if any resource is unknown, reserved, locked, or claimed by a
    /// different project.
    pub async fn lock(
        &self,
        names: &[String],
        job: &JobRef,
        resume: Option<crate::core::ResumeHandle>,
    ) -> bool {
        let mut ops = Vec::new();
        {
            let mut state = self.state.write();
            let denied = names.iter().any(|n| {
                state.pool.by_name(n).is_none_or(|r| {
                    r.is_reserved() || r.is_locked() || r.is_queued_by_other_project(&job.project)
                })
            });
            if denied {
                tracing::debug!(job = %job, "lock denied for {names:?}");
                return false;
            }
            take(&mut state.pool, names, &job.id, self.owner_for(job), &mut ops);
            self.persist(&state);
            self.stage(ops);
        }
        tracing::info!(job = %job, "locked {names:?}");
        self.record(&job.id, names, "lock", None);

        if let Some(handle) = resume {
            if let Err(names) = handle.resume(names.to_vec()) {
                tracing::warn!(job = %job, "waiter went away before the grant; releasing");
                self.unlock(&names, Some(&job.id), self.inverse_precedence).await;
                return false;
            }
        }
        self.flush().await;
        true
    }

    /// Release resources and hand them to the next satisfiable waiting context.
    ///
    /// With `job` set only resources locked by that job are released; with
    /// `None` every named resource is forcibly released.
    pub async fn unlock(&self, names: &[String], job: Option<&str>, inverse_precedence: bool) {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let released: Vec<String> = names
                .iter()
                .filter(|n| {
                    state.pool.by_name(n).is_some_and(|r| match job {
                        Some(job) => r.is_locked_by(job),
                        None => true,
                    })
                })
                .cloned()
                .collect();

            let mut ops = Vec::new();
            if !released.is_empty() {
                free(&mut state.pool, &released, &mut ops);
                tracing::info!(job = job.unwrap_or("-"), "released {released:?}");
                self.record(job.unwrap_or("-"), &released, "unlock", None);
                self.dispatch(state, released, job.map(str::to_string), inverse_precedence, &mut ops);
            }
            self.persist(state);
            self.stage(ops);
        }
        self.flush().await;
    }

    /// Offer freshly freed resources to waiting contexts until none of the
    /// remaining names satisfies anyone.
    ///
    /// A context whose waiter has gone away gives its grant back and the loop
    /// continues with it, so a dropped ticket never strands a resource.
    fn dispatch(
        &self,
        state: &mut SchedulerState,
        mut freed: Vec<String>,
        mut holder: Option<JobId>,
        inverse_precedence: bool,
        ops: &mut Vec<MirrorOp>,
    ) {
        loop {
            freed.retain(|n| state.pool.by_name(n).is_some_and(Resource::is_free));
            if freed.is_empty() {
                break;
            }
            let next = state.waiters.dequeue_satisfiable(
                &state.pool,
                &freed,
                inverse_precedence,
                self.jobs.as_ref(),
            );
            let Some((ctx, granted)) = next else {
                break;
            };
            if self.jobs.started_at_ms(&ctx.job).is_none() {
                tracing::warn!(context = %ctx.id(), job = %ctx.job, "dropping orphaned waiting context");
                self.record(&ctx.job, &[], "orphan", Some(ctx.description.clone()));
                continue;
            }

            take(&mut state.pool, &granted, &ctx.job, &self.default_owner, ops);
            let next_job = ctx.job.clone();
            tracing::info!(
                from = holder.as_deref().unwrap_or("-"),
                to = %next_job,
                "handing over {granted:?}"
            );
            self.record(&next_job, &granted, "handover", holder.clone());
            if let Err(returned) = ctx.into_handle().resume(granted) {
                tracing::warn!(job = %next_job, "waiter went away; passing its grant on");
                free(&mut state.pool, &returned, ops);
                for name in returned {
                    if !freed.contains(&name) {
                        freed.push(name);
                    }
                }
                holder = Some(next_job);
            }
        }
    }

    // ---- reservations ----

    /// Reserve every named resource for `owner`. All-or-nothing.
    pub async fn reserve(&self, names: &[String], owner: &str) -> bool {
        let mut ops = Vec::new();
        {
            let mut state = self.state.write();
            let denied = names.iter().any(|n| {
                state
                    .pool
                    .by_name(n)
                    .is_none_or(|r| r.is_reserved() || r.is_locked() || r.is_queued())
            });
            if denied {
                tracing::debug!(%owner, "reservation denied for {names:?}");
                return false;
            }
            for name in names {
                let Some(r) = state.pool.by_name_mut(name) else {
                    continue;
                };
                r.reserved_by = Some(owner.to_string());
                if let Some(origin) = r.external.as_mut() {
                    origin.adopted = false;
                    ops.push(MirrorOp::Create {
                        self_link: origin.self_link.clone(),
                        owner: owner.to_string(),
                        build_ref: None,
                        indefinite: false,
                    });
                }
            }
            self.persist(&state);
            self.stage(ops);
        }
        tracing::info!(%owner, "reserved {names:?}");
        self.record(owner, names, "reserve", None);
        self.flush().await;
        true
    }

    /// Clear reservations and offer the freed resources to waiting contexts.
    /// Resources that are not reserved are left alone.
    pub async fn unreserve(&self, names: &[String]) {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let mut ops = Vec::new();
            let mut cleared = Vec::new();
            for name in names {
                let Some(r) = state.pool.by_name_mut(name) else {
                    continue;
                };
                if r.reserved_by.take().is_none() {
                    continue;
                }
                if let Some(origin) = r.external.as_mut() {
                    origin.adopted = false;
                    ops.push(MirrorOp::Delete {
                        self_link: origin.self_link.clone(),
                        job: None,
                    });
                }
                cleared.push(name.clone());
            }
            if cleared.is_empty() {
                return;
            }
            tracing::info!("unreserved {cleared:?}");
            self.record("-", &cleared, "unreserve", None);
            self.dispatch(state, cleared, None, self.inverse_precedence, &mut ops);
            self.persist(state);
            self.stage(ops);
        }
        self.flush().await;
    }

    /// Clear lock, queue, and reservation state on the named resources and
    /// offer them to waiting contexts.
    pub async fn reset(&self, names: &[String]) {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let mut ops = Vec::new();
            let mut cleared = Vec::new();
            for name in names {
                let Some(r) = state.pool.by_name_mut(name) else {
                    continue;
                };
                let held = r.locked_by.clone();
                let had_remote = r.is_locked() || r.is_reserved();
                r.reset();
                if let Some(origin) = r.external.as_mut() {
                    origin.adopted = false;
                    if had_remote {
                        origin.released.clone_from(&held);
                        ops.push(MirrorOp::Delete {
                            self_link: origin.self_link.clone(),
                            job: held,
                        });
                    }
                }
                cleared.push(name.clone());
            }
            tracing::info!("reset {names:?}");
            self.record("-", names, "reset", None);
            self.dispatch(state, cleared, None, self.inverse_precedence, &mut ops);
            self.persist(state);
            self.stage(ops);
        }
        self.flush().await;
    }

    // ---- caller surface ----

    /// Acquire `required` for `job`, locking immediately or queueing a waiting context.
    ///
    /// Unknown names and malformed labels are rejected without queueing.
    pub async fn acquire(
        &self,
        required: RequiredResources,
        job: &JobRef,
        description: impl Into<String>,
    ) -> Result<Acquisition, SchedulerError> {
        let outcome = {
            let mut state = self.state.write();
            state.pool.validate(&required)?;
            match state.pool.check_availability(&required, true, &[]) {
                Some(names) => {
                    let mut ops = Vec::new();
                    take(&mut state.pool, &names, &job.id, self.owner_for(job), &mut ops);
                    self.persist(&state);
                    self.stage(ops);
                    Acquisition::Granted(names)
                }
                None => {
                    let (handle, ticket) = resume_channel();
                    let ctx = WaitingContext::new(required, job.id.clone(), description, handle);
                    state.waiters.enqueue(ctx);
                    self.persist(&state);
                    Acquisition::Queued(ticket)
                }
            }
        };
        match &outcome {
            Acquisition::Granted(names) => {
                tracing::info!(job = %job, "locked {names:?}");
                self.record(&job.id, names, "lock", None);
            }
            Acquisition::Queued(ticket) => {
                tracing::info!(job = %job, context = %ticket.id(), "waiting for resources");
                self.record(&job.id, &[], "wait", None);
            }
        }
        self.flush().await;
        Ok(outcome)
    }

    /// Release resources held by `job` using the configured wake order.
    pub async fn release(&self, names: &[String], job: &str) {
        self.unlock(names, Some(job), self.inverse_precedence).await;
    }

    /// Withdraw a waiting context. Returns false if it already left the queue.
    pub fn cancel_wait(&self, id: ContextId) -> bool {
        let mut state = self.state.write();
        let removed = state.waiters.cancel(id);
        if removed {
            tracing::debug!(context = %id, "waiting context cancelled");
            self.persist(&state);
        }
        removed
    }

    // ---- administration ----

    /// Add a local resource. Returns false if the name is taken.
    pub fn create_resource(&self, name: &str, labels: &str) -> bool {
        let mut state = self.state.write();
        let created = state.pool.insert(Resource::new(name).with_labels(labels));
        if created {
            tracing::info!(resource = name, "created resource");
            self.persist(&state);
        }
        created
    }

    /// Replace local resource definitions, keeping the owner state of
    /// resources that survive.
    pub fn reconfigure(&self, definitions: &[ResourceDefinition]) -> Result<(), SchedulerError> {
        let mut seen = BTreeSet::new();
        if let Some(dup) = definitions.iter().find(|d| !seen.insert(d.name.as_str())) {
            return Err(SchedulerError::ConfigurationInvalid(format!(
                "duplicate resource name: {}",
                dup.name
            )));
        }
        let mut state = self.state.write();
        state
            .pool
            .replace_local(definitions.iter().map(ResourceDefinition::to_resource).collect());
        self.persist(&state);
        tracing::info!(count = definitions.len(), "reconfigured local resources");
        Ok(())
    }

    // ---- helpers ----

    fn owner_for<'a>(&'a self, job: &'a JobRef) -> &'a str {
        job.user.as_deref().unwrap_or(&self.default_owner)
    }

    fn persist(&self, state: &SchedulerState) {
        let resources = state
            .pool
            .list()
            .iter()
            .filter(|r| !r.is_external())
            .map(ResourceDefinition::from_resource)
            .collect();
        if let Err(e) = self.store.save_pool(resources, state.waiters.descriptors()) {
            tracing::error!("failed to persist scheduler state: {e}");
        }
    }

    /// Queue registry writes. Only called with the state write guard held.
    fn stage(&self, ops: Vec<MirrorOp>) {
        if let Some(sync) = &self.sync {
            sync.stage(ops);
        }
    }

    async fn flush(&self) {
        if let Some(sync) = &self.sync {
            sync.flush().await;
        }
    }

    fn record(&self, subject: &str, resources: &[String], action: &str, payload: Option<String>) {
        if let Some(audit) = &self.audit {
            audit
                .lock()
                .record(build_audit_event(subject, resources, action, payload));
        }
    }
}

fn resource_names(resources: Vec<&Resource>) -> Vec<String> {
    resources.into_iter().map(|r| r.name.clone()).collect()
}

/// Lock `names` to `job`, emitting mirror writes for mirrored resources.
fn take(pool: &mut ResourcePool, names: &[String], job: &str, owner: &str, ops: &mut Vec<MirrorOp>) {
    for name in names {
        let Some(r) = pool.by_name_mut(name) else {
            continue;
        };
        let previous = r.locked_by.replace(job.to_string());
        r.unqueue();
        let Some(origin) = r.external.as_mut() else {
            continue;
        };
        origin.adopted = false;
        origin.released = None;
        if let Some(previous) = previous.filter(|p| p != job) {
            ops.push(MirrorOp::Delete {
                self_link: origin.self_link.clone(),
                job: Some(previous),
            });
        }
        ops.push(MirrorOp::Create {
            self_link: origin.self_link.clone(),
            owner: owner.to_string(),
            build_ref: Some(job.to_string()),
            indefinite: true,
        });
    }
}

/// Clear lock and queue state on `names`.
fn free(pool: &mut ResourcePool, names: &[String], ops: &mut Vec<MirrorOp>) {
    for name in names {
        let Some(r) = pool.by_name_mut(name) else {
            continue;
        };
        let previous = r.locked_by.take();
        r.unqueue();
        if let (Some(previous), Some(origin)) = (previous, r.external.as_mut()) {
            origin.adopted = false;
            origin.released = Some(previous.clone());
            ops.push(MirrorOp::Delete {
                self_link: origin.self_link.clone(),
                job: Some(previous),
            });
        }
    }
}
