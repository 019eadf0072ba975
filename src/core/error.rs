//! Error types for admission operations.

use thiserror::Error;

use crate::core::RequiredResources;

/// Errors produced by scheduler components.
///
/// Contention is never an error: admission methods report it as `false`/`None`
/// and the caller re-polls or waits on its ticket.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A requested resource name is not known to the pool.
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    /// A label expression could not be parsed or matches nothing known.
    #[error("invalid label: {0}")]
    InvalidLabel(String),
    /// Configuration rejected during validation.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),
    /// The external registry could not be reached or refused the call.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),
    /// A waiting context was dropped before it could be granted.
    #[error("orphaned context: {0}")]
    OrphanedContext(String),
    /// Persisting scheduler state failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

/// Why a job cannot be admitted right now.
///
/// The `Display` output is the human-readable reason shown to users while a
/// job waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The requirement is valid but not satisfiable at the moment.
    WaitingFor(RequiredResources),
    /// The job names a resource the pool does not know.
    UnknownResource(String),
    /// The external registry failed its health check.
    RegistryUnhealthy(String),
    /// Remote resources were requested but no registry is configured.
    RegistryMisconfigured,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WaitingFor(required) => write!(f, "Waiting for {required}"),
            Self::UnknownResource(name) => {
                write!(f, "Could not find resource with name: {name}")
            }
            Self::RegistryUnhealthy(url) => write!(f, "{url} is not healthy."),
            Self::RegistryMisconfigured => f.write_str(
                "The resource registry is misconfigured. Could not reach the registry API.",
            ),
        }
    }
}
