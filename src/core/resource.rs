//! The lockable resource entity and its state machine.
//!
//! A resource is free, queued, locked, or reserved. The state is derived from
//! three independent owner fields rather than stored as an enum so that a
//! reservation can coexist with a lock that predates it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::util::serde::{JobId, QueueItemId};

/// Provisional claim set by a pending queue item before it locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueClaim {
    /// Pending queue item that placed the claim.
    pub item_id: QueueItemId,
    /// Project the item belongs to.
    pub project: String,
}

impl QueueClaim {
    /// Create a claim for `item_id` of `project`.
    pub fn new(item_id: QueueItemId, project: impl Into<String>) -> Self {
        Self {
            item_id,
            project: project.into(),
        }
    }
}

/// Active reservation on a mirrored remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReservation {
    /// Owner recorded on the remote reservation.
    pub owner: Option<String>,
    /// Job that holds the reservation, if it was created for a build.
    pub build_ref: Option<JobId>,
}

/// Link from a pool entry back to the registry object it mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalOrigin {
    /// Self link of the remote object; the dedup key across listings.
    pub self_link: String,
    /// Reservation reported by the last listing.
    pub reservation: Option<RemoteReservation>,
    /// True when the local owner fields were adopted from a remote hold rather
    /// than set by a local lock or reservation.
    pub adopted: bool,
    /// Job released locally whose remote reservation may still be listed
    /// until the delete lands.
    #[serde(default)]
    pub released: Option<JobId>,
}

/// Current state of a resource, most restrictive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Held by a manual or external reservation.
    Reserved,
    /// Exclusively held by a running job.
    Locked,
    /// Provisionally claimed by a pending queue item.
    Queued,
    /// Available.
    Free,
}

/// A named, labeled, exclusive-use resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Unordered label tokens.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Job currently holding the lock.
    #[serde(default)]
    pub locked_by: Option<JobId>,
    /// Pending claim placed before locking.
    #[serde(default)]
    pub queued_by: Option<QueueClaim>,
    /// Reservation owner.
    #[serde(default)]
    pub reserved_by: Option<String>,
    /// Present when the resource mirrors a registry object.
    #[serde(default)]
    pub external: Option<ExternalOrigin>,
}

impl Resource {
    /// Create a free local resource with no labels.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            labels: BTreeSet::new(),
            locked_by: None,
            queued_by: None,
            reserved_by: None,
            external: None,
        }
    }

    /// Builder-style label assignment from a whitespace separated string.
    #[must_use]
    pub fn with_labels(mut self, labels: &str) -> Self {
        self.labels = parse_labels(labels);
        self
    }

    /// Builder-style description assignment.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// True when held by a reservation.
    pub const fn is_reserved(&self) -> bool {
        self.reserved_by.is_some()
    }

    /// True when held by a job.
    pub const fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }

    /// True when claimed by any pending item.
    pub const fn is_queued(&self) -> bool {
        self.queued_by.is_some()
    }

    /// True when claimed by a pending item other than `item_id`.
    pub fn is_queued_by_other(&self, item_id: QueueItemId) -> bool {
        self.queued_by.as_ref().is_some_and(|c| c.item_id != item_id)
    }

    /// True when claimed by a project other than `project`.
    pub fn is_queued_by_other_project(&self, project: &str) -> bool {
        self.queued_by.as_ref().is_some_and(|c| c.project != project)
    }

    /// True when held by `job`.
    pub fn is_locked_by(&self, job: &str) -> bool {
        self.locked_by.as_deref() == Some(job)
    }

    /// True when neither locked, queued, nor reserved.
    pub const fn is_free(&self) -> bool {
        !self.is_locked() && !self.is_queued() && !self.is_reserved()
    }

    /// True when the resource mirrors a registry object.
    pub const fn is_external(&self) -> bool {
        self.external.is_some()
    }

    /// Derived state.
    pub const fn state(&self) -> ResourceState {
        if self.is_reserved() {
            ResourceState::Reserved
        } else if self.is_locked() {
            ResourceState::Locked
        } else if self.is_queued() {
            ResourceState::Queued
        } else {
            ResourceState::Free
        }
    }

    /// Drop any queue claim.
    pub fn unqueue(&mut self) {
        self.queued_by = None;
    }

    /// Clear every owner field.
    pub fn reset(&mut self) {
        self.locked_by = None;
        self.queued_by = None;
        self.reserved_by = None;
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Split a label string on whitespace and commas.
pub fn parse_labels(labels: &str) -> BTreeSet<String> {
    labels
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
