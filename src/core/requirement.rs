//! Resource requirements and label matching.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::util::serde::Params;

/// What a job needs before it may run.
///
/// When `label` is set, candidates are every resource carrying that label;
/// otherwise candidates are the explicit `names`, in order. `count` is the
/// number of candidates required, with 0 meaning all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredResources {
    /// Explicit resource names.
    #[serde(default)]
    pub names: Vec<String>,
    /// Label selecting candidate resources.
    #[serde(default)]
    pub label: Option<String>,
    /// Number of candidates required; 0 means all.
    #[serde(default)]
    pub count: usize,
    /// Parameters substituted into dynamic labels.
    #[serde(default)]
    pub params: Params,
}

impl RequiredResources {
    /// Require every one of the given resources.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Require `count` resources carrying `label` (0 = all of them).
    pub fn with_label(label: impl Into<String>, count: usize) -> Self {
        Self {
            label: Some(label.into()),
            count,
            ..Self::default()
        }
    }

    /// Attach parameters used to resolve dynamic labels.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Label used for candidate selection, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref().filter(|l| !l.is_empty())
    }

    /// True when selection goes through the label/count path rather than a
    /// plain all-of-these-names request.
    pub fn is_counted(&self) -> bool {
        self.label().is_some() || self.count > 0
    }

    /// True when nothing is required.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.label().is_none()
    }
}

impl std::fmt::Display for RequiredResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.label() {
            Some(label) => write!(f, "resources with label {label}"),
            None => write!(f, "resources [{}]", self.names.join(", ")),
        }
    }
}

/// Decides whether a resource's label set satisfies a requested label.
///
/// Implementations must be pure: the same inputs always give the same answer.
pub trait LabelMatcher: Send + Sync {
    /// Return true if a resource carrying `labels` matches `label` under `params`.
    fn matches(&self, label: &str, labels: &BTreeSet<String>, params: &Params) -> bool;

    /// Reject malformed label expressions up front.
    fn validate(&self, label: &str) -> Result<(), SchedulerError> {
        if label.trim().is_empty() || label.split_whitespace().count() > 1 {
            return Err(SchedulerError::InvalidLabel(label.to_string()));
        }
        Ok(())
    }

    /// True when the label is computed rather than a literal token. Dynamic
    /// labels are accepted even if no resource currently carries them.
    fn is_dynamic(&self, _label: &str) -> bool {
        false
    }
}

/// Plain token matching: the label must appear in the resource's label set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenLabelMatcher;

impl LabelMatcher for TokenLabelMatcher {
    fn matches(&self, label: &str, labels: &BTreeSet<String>, _params: &Params) -> bool {
        labels.contains(label)
    }
}

/// Token matching after `${key}` placeholders are substituted from params.
///
/// `rack-${arch}` with `arch=arm64` matches resources labeled `rack-arm64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateLabelMatcher;

impl TemplateLabelMatcher {
    /// Substitute every placeholder in `label`.
    pub fn resolve(label: &str, params: &Params) -> Result<String, SchedulerError> {
        let mut out = String::with_capacity(label.len());
        let mut rest = label;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| SchedulerError::InvalidLabel(format!("unterminated placeholder in `{label}`")))?;
            let key = &after[..end];
            if key.is_empty() {
                return Err(SchedulerError::InvalidLabel(format!("empty placeholder in `{label}`")));
            }
            let value = params
                .get(key)
                .ok_or_else(|| SchedulerError::InvalidLabel(format!("no value for `{key}` in `{label}`")))?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl LabelMatcher for TemplateLabelMatcher {
    fn matches(&self, label: &str, labels: &BTreeSet<String>, params: &Params) -> bool {
        Self::resolve(label, params).is_ok_and(|resolved| labels.contains(&resolved))
    }

    fn validate(&self, label: &str) -> Result<(), SchedulerError> {
        TokenLabelMatcher.validate(label)?;
        if !self.is_dynamic(label) {
            return Ok(());
        }
        // Check syntax only; values are supplied per request.
        let mut rest = label;
        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(0) => {
                    return Err(SchedulerError::InvalidLabel(format!("empty placeholder in `{label}`")))
                }
                Some(end) => rest = &after[end + 1..],
                None => {
                    return Err(SchedulerError::InvalidLabel(format!(
                        "unterminated placeholder in `{label}`"
                    )))
                }
            }
        }
        Ok(())
    }

    fn is_dynamic(&self, label: &str) -> bool {
        label.contains("${")
    }
}

/// Adapter turning a closure into a [`LabelMatcher`].
pub struct PredicateLabelMatcher<F> {
    predicate: F,
}

impl<F> PredicateLabelMatcher<F>
where
    F: Fn(&str, &BTreeSet<String>, &Params) -> bool + Send + Sync,
{
    /// Wrap `predicate`.
    pub const fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> LabelMatcher for PredicateLabelMatcher<F>
where
    F: Fn(&str, &BTreeSet<String>, &Params) -> bool + Send + Sync,
{
    fn matches(&self, label: &str, labels: &BTreeSet<String>, params: &Params) -> bool {
        (self.predicate)(label, labels, params)
    }

    fn is_dynamic(&self, _label: &str) -> bool {
        true
    }
}
