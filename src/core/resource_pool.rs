//! Resource pool store and queries.
//!
//! The pool is a passive store: it answers lookups and availability questions
//! and exposes mutable access, but every state transition is decided by the
//! [`AdmissionScheduler`](crate::core::AdmissionScheduler) while it holds the
//! admission lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::{LabelMatcher, RequiredResources, Resource, SchedulerError, TokenLabelMatcher};
use crate::util::serde::Params;

/// Ordered collection of local and mirrored resources.
///
/// Iteration order is local resources in configuration order followed by
/// mirrored resources in listing order. Label selection honors this order.
pub struct ResourcePool {
    resources: Vec<Resource>,
    matcher: Arc<dyn LabelMatcher>,
    collisions: BTreeSet<String>,
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("resources", &self.resources)
            .field("collisions", &self.collisions)
            .finish_non_exhaustive()
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ResourcePool {
    /// Create a pool using plain token label matching.
    pub fn new(resources: Vec<Resource>) -> Self {
        Self::with_matcher(resources, Arc::new(TokenLabelMatcher))
    }

    /// Create a pool with a custom label matcher.
    pub fn with_matcher(resources: Vec<Resource>, matcher: Arc<dyn LabelMatcher>) -> Self {
        Self {
            resources,
            matcher,
            collisions: BTreeSet::new(),
        }
    }

    /// All resources in iteration order.
    pub fn list(&self) -> &[Resource] {
        &self.resources
    }

    /// Look up a resource by name.
    pub fn by_name(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Mutable lookup by name.
    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.name == name)
    }

    /// Resources matching `label` after resolving it with `params`.
    pub fn with_label(&self, label: &str, params: &Params) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| self.matcher.matches(label, &r.labels, params))
            .collect()
    }

    /// Number of free resources matching `label` with no parameters.
    pub fn free_count_for_label(&self, label: &str) -> usize {
        let params = Params::new();
        self.resources
            .iter()
            .filter(|r| r.is_free() && self.matcher.matches(label, &r.labels, &params))
            .count()
    }

    /// Every label token carried by any resource.
    pub fn all_labels(&self) -> BTreeSet<String> {
        self.resources
            .iter()
            .flat_map(|r| r.labels.iter().cloned())
            .collect()
    }

    /// A label is valid if it is dynamic or some resource carries it.
    pub fn is_valid_label(&self, label: &str) -> bool {
        self.matcher.is_dynamic(label) || self.resources.iter().any(|r| r.labels.contains(label))
    }

    /// Resources currently queued by `project`.
    pub fn for_project(&self, project: &str) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| r.queued_by.as_ref().is_some_and(|c| c.project == project))
            .collect()
    }

    /// Resources currently locked by `job`.
    pub fn for_job(&self, job: &str) -> Vec<&Resource> {
        self.resources.iter().filter(|r| r.is_locked_by(job)).collect()
    }

    /// True when `name` is a locally configured resource.
    pub fn is_local(&self, name: &str) -> bool {
        self.by_name(name).is_some_and(|r| !r.is_external())
    }

    /// Label matcher in use.
    pub fn matcher(&self) -> &dyn LabelMatcher {
        self.matcher.as_ref()
    }

    /// Check that a requirement only refers to known resources and well-formed labels.
    pub fn validate(&self, required: &RequiredResources) -> Result<(), SchedulerError> {
        if let Some(label) = required.label() {
            self.matcher.validate(label)?;
            if !self.is_valid_label(label) {
                return Err(SchedulerError::InvalidLabel(label.to_string()));
            }
            return Ok(());
        }
        self.require_all(&required.names)
    }

    /// Fail with the first unknown name.
    pub fn require_all(&self, names: &[String]) -> Result<(), SchedulerError> {
        match names.iter().find(|n| self.by_name(n).is_none()) {
            Some(unknown) => Err(SchedulerError::UnknownResource(unknown.clone())),
            None => Ok(()),
        }
    }

    /// Candidate resources for a requirement, in selection order.
    pub fn candidates(&self, required: &RequiredResources) -> Vec<&Resource> {
        match required.label() {
            Some(label) => self.with_label(label, &required.params),
            None => required.names.iter().filter_map(|n| self.by_name(n)).collect(),
        }
    }

    /// Pick resources that would satisfy `required`.
    ///
    /// The result lists names in candidate order.
    ///
    /// Candidates named in `about_to_free` are reused first even though they are
    /// still locked. When `about_to_free` is non-empty and none of them can be
    /// reused the requirement is reported as unsatisfiable, so a release only
    /// wakes contexts that actually benefit from it. The remainder is filled
    /// from candidates that are neither locked nor queued, and not reserved
    /// when `exclude_reserved` is set.
    pub fn check_availability(
        &self,
        required: &RequiredResources,
        exclude_reserved: bool,
        about_to_free: &[String],
    ) -> Option<Vec<String>> {
        let candidates = self.candidates(required);
        let wanted = match (required.count, required.label()) {
            (0, Some(_)) => candidates.len(),
            (0, None) => required.names.len(),
            (n, _) => n,
        };
        if wanted == 0 {
            return required.is_empty().then(Vec::new);
        }

        let blocked = |r: &Resource| exclude_reserved && r.is_reserved();
        let mut selected: Vec<String> = Vec::with_capacity(wanted);

        if !about_to_free.is_empty() {
            for &candidate in &candidates {
                if selected.len() >= wanted {
                    break;
                }
                if about_to_free.contains(&candidate.name) && !blocked(candidate) {
                    selected.push(candidate.name.clone());
                }
            }
            if selected.is_empty() {
                return None;
            }
        }

        for &candidate in &candidates {
            if selected.len() >= wanted {
                break;
            }
            if selected.contains(&candidate.name)
                || candidate.is_locked()
                || candidate.is_queued()
                || blocked(candidate)
            {
                continue;
            }
            selected.push(candidate.name.clone());
        }

        if selected.len() < wanted {
            tracing::trace!(
                found = selected.len(),
                wanted,
                "not enough available resources for {required}"
            );
            return None;
        }
        selected.sort_by_key(|name| candidates.iter().position(|c| &c.name == name));
        Some(selected)
    }

    /// Add a resource; returns false if the name is already taken.
    pub fn insert(&mut self, resource: Resource) -> bool {
        if self.by_name(&resource.name).is_some() {
            return false;
        }
        // Keep local entries ahead of mirrored ones.
        if resource.is_external() {
            self.resources.push(resource);
        } else {
            let at = self
                .resources
                .iter()
                .position(Resource::is_external)
                .unwrap_or(self.resources.len());
            self.resources.insert(at, resource);
        }
        true
    }

    /// Replace the local definitions, keeping owner state of resources that survive.
    pub fn replace_local(&mut self, definitions: Vec<Resource>) {
        let mut local: Vec<Resource> = Vec::with_capacity(definitions.len());
        for mut def in definitions {
            if let Some(old) = self.by_name(&def.name).filter(|r| !r.is_external()) {
                def.locked_by.clone_from(&old.locked_by);
                def.queued_by.clone_from(&old.queued_by);
                if def.reserved_by.is_none() {
                    def.reserved_by.clone_from(&old.reserved_by);
                }
            }
            local.push(def);
        }
        self.resources.retain(Resource::is_external);
        // Drop mirrored entries that now collide with a local name.
        self.resources.retain(|r| !local.iter().any(|l| l.name == r.name));
        local.append(&mut self.resources);
        self.resources = local;
    }

    /// Mirrored entries, mutable, in listing order.
    pub(crate) fn external_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.resources.iter_mut().filter(|r| r.is_external())
    }

    /// Remove mirrored entries that fail `keep`.
    pub(crate) fn retain_external(&mut self, mut keep: impl FnMut(&Resource) -> bool) {
        self.resources.retain(|r| !r.is_external() || keep(r));
    }

    /// Record names that exist both locally and in the registry.
    pub(crate) fn set_collisions(&mut self, collisions: BTreeSet<String>) {
        self.collisions = collisions;
    }

    /// Names that the registry reported but that are shadowed by local resources.
    pub fn name_collisions(&self) -> &BTreeSet<String> {
        &self.collisions
    }
}
