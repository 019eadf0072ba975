//! Waiting contexts and their wake-up policy.
//!
//! A context is parked when its requirement cannot be met immediately. It holds
//! the sending half of a oneshot channel; the caller awaits the receiving half
//! through a [`WaitTicket`]. The admission lock is never held across that wait.

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::core::store::WaitingDescriptor;
use crate::core::{RequiredResources, ResourcePool, SchedulerError};
use crate::util::serde::JobId;

/// Identity of a waiting context and of its resumption handle.
pub type ContextId = Uuid;

/// Resources handed to a waiting context, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Context that was resumed.
    pub context: ContextId,
    /// Names of the locked resources.
    pub resources: Vec<String>,
}

/// Sending half of a resumption channel; resolved at most once.
#[derive(Debug)]
pub struct ResumeHandle {
    id: ContextId,
    tx: oneshot::Sender<Grant>,
}

impl ResumeHandle {
    /// Identity shared with the matching [`WaitTicket`].
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Deliver the grant. Returns the names back if the waiter has gone away.
    pub fn resume(self, resources: Vec<String>) -> Result<(), Vec<String>> {
        self.tx
            .send(Grant {
                context: self.id,
                resources,
            })
            .map_err(|grant| grant.resources)
    }
}

/// Receiving half held by a suspended caller.
#[derive(Debug)]
pub struct WaitTicket {
    id: ContextId,
    rx: oneshot::Receiver<Grant>,
}

impl WaitTicket {
    /// Identity used to cancel the wait.
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Wait until resources are granted.
    ///
    /// Fails with [`SchedulerError::OrphanedContext`] if the context was cancelled
    /// or dropped before a grant.
    pub async fn granted(self) -> Result<Grant, SchedulerError> {
        let id = self.id;
        self.rx
            .await
            .map_err(|_| SchedulerError::OrphanedContext(id.to_string()))
    }

    /// Non-blocking check for a grant that has already been delivered.
    pub fn try_granted(&mut self) -> Option<Grant> {
        self.rx.try_recv().ok()
    }
}

/// Create a linked handle/ticket pair.
pub fn resume_channel() -> (ResumeHandle, WaitTicket) {
    let id = Uuid::new_v4();
    let (tx, rx) = oneshot::channel();
    (ResumeHandle { id, tx }, WaitTicket { id, rx })
}

/// Resolves job metadata for precedence and orphan detection.
pub trait JobDirectory: Send + Sync {
    /// Start time of `job`, or `None` if the job no longer exists.
    fn started_at_ms(&self, job: &str) -> Option<u128>;
}

/// A suspended acquisition request.
#[derive(Debug)]
pub struct WaitingContext {
    /// Requirement to satisfy.
    pub required: RequiredResources,
    /// Job that is waiting.
    pub job: JobId,
    /// Human-readable description shown while waiting.
    pub description: String,
    seq: u64,
    handle: ResumeHandle,
}

impl WaitingContext {
    /// Create a context around a resumption handle.
    pub fn new(
        required: RequiredResources,
        job: impl Into<JobId>,
        description: impl Into<String>,
        handle: ResumeHandle,
    ) -> Self {
        Self {
            required,
            job: job.into(),
            description: description.into(),
            seq: 0,
            handle,
        }
    }

    /// Context identity.
    pub const fn id(&self) -> ContextId {
        self.handle.id
    }

    /// Insertion order within the queue.
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Persisted form; the handle is not included.
    pub fn descriptor(&self) -> WaitingDescriptor {
        WaitingDescriptor {
            required: self.required.clone(),
            description: self.description.clone(),
            job: self.job.clone(),
        }
    }

    pub(crate) fn into_handle(self) -> ResumeHandle {
        self.handle
    }
}

/// Ordered collection of waiting contexts.
#[derive(Debug, Default)]
pub struct WaitQueue {
    contexts: Vec<WaitingContext>,
    next_seq: u64,
}

impl WaitQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of waiting contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// True when a context with `id` is waiting.
    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.iter().any(|c| c.id() == id)
    }

    /// Waiting contexts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &WaitingContext> {
        self.contexts.iter()
    }

    /// Add a context unless one with the same handle is already waiting.
    pub fn enqueue(&mut self, mut ctx: WaitingContext) -> bool {
        if self.contains(ctx.id()) {
            return false;
        }
        ctx.seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(context = %ctx.id(), job = %ctx.job, "queued waiting context for {}", ctx.required);
        self.contexts.push(ctx);
        true
    }

    /// Remove a context by id.
    pub fn remove(&mut self, id: ContextId) -> Option<WaitingContext> {
        let at = self.contexts.iter().position(|c| c.id() == id)?;
        Some(self.contexts.remove(at))
    }

    /// Withdraw a context. Idempotent; returns true only if it was still waiting.
    pub fn cancel(&mut self, id: ContextId) -> bool {
        self.remove(id).is_some()
    }

    /// Persisted form of every waiting context.
    pub fn descriptors(&self) -> Vec<WaitingDescriptor> {
        self.contexts.iter().map(WaitingContext::descriptor).collect()
    }

    /// Take the next context that `freeing` would let proceed, together with
    /// the resource names it would be granted.
    ///
    /// FIFO picks the first satisfiable context. Inverse precedence picks the
    /// satisfiable context whose job started most recently, and drops any
    /// satisfiable context whose job can no longer be resolved.
    pub fn dequeue_satisfiable(
        &mut self,
        pool: &ResourcePool,
        freeing: &[String],
        inverse_precedence: bool,
        jobs: &dyn JobDirectory,
    ) -> Option<(WaitingContext, Vec<String>)> {
        if !inverse_precedence {
            let (at, names) = self.contexts.iter().enumerate().find_map(|(i, c)| {
                pool.check_availability(&c.required, true, freeing)
                    .map(|names| (i, names))
            })?;
            return Some((self.contexts.remove(at), names));
        }

        let mut newest: Option<(u128, ContextId, Vec<String>)> = None;
        let mut orphans: Vec<ContextId> = Vec::new();
        for ctx in &self.contexts {
            let Some(names) = pool.check_availability(&ctx.required, true, freeing) else {
                continue;
            };
            match jobs.started_at_ms(&ctx.job) {
                Some(started) if newest.as_ref().is_none_or(|(n, _, _)| started > *n) => {
                    newest = Some((started, ctx.id(), names));
                }
                Some(_) => {}
                None => orphans.push(ctx.id()),
            }
        }
        for id in orphans {
            if let Some(ctx) = self.remove(id) {
                tracing::warn!(context = %id, job = %ctx.job, "dropping orphaned waiting context");
            }
        }
        let (_, id, names) = newest?;
        self.remove(id).map(|ctx| (ctx, names))
    }
}
