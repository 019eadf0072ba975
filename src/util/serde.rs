//! Shared identifier types used across the admission layer.

use serde::{Deserialize, Serialize};

/// Stable, externally meaningful job identifier (e.g. `project#42`).
pub type JobId = String;

/// Identifier of a pending queue item before it becomes a running job.
pub type QueueItemId = u64;

/// Opaque parameter map used when resolving dynamic label expressions.
pub type Params = std::collections::BTreeMap<String, String>;

/// Reference to a job as seen by the admission layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRef {
    /// Job identifier, recorded as the lock owner.
    pub id: JobId,
    /// Project the job belongs to. Queue claims are matched by project.
    pub project: String,
    /// User that triggered the job, if any.
    #[serde(default)]
    pub user: Option<String>,
}

impl JobRef {
    /// Create a job reference without a triggering user.
    pub fn new(id: impl Into<JobId>, project: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project: project.into(),
            user: None,
        }
    }

    /// Attach the user that triggered the job.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
