//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Task failed validation before any resource was touched.
    #[error("invalid task: {0}")]
    InvalidTask(String),
    /// No resource currently has enough free capacity.
    #[error("no capacity")]
    NoCapacity,
    /// A reservation would push a resource past its capacity.
    #[error("over-commit on `{resource}`: requested {requested}, available {available}")]
    OverCommit {
        /// Resource the reservation targeted.
        resource: String,
        /// Units requested.
        requested: u32,
        /// Units still free at the time of the request.
        available: u32,
    },
    /// More units were released than the resource held.
    #[error("release mismatch on `{resource}`: released {released}, held {held}")]
    ReleaseMismatch {
        /// Resource the release targeted.
        resource: String,
        /// Units the caller tried to release.
        released: u32,
        /// Units actually held.
        held: u32,
    },
    /// Resource id is not known to the pool.
    #[error("unknown resource: {0}")]
    UnknownResource(String),
    /// The knowledge source could not answer a query.
    #[error("knowledge unavailable: {0}")]
    KnowledgeUnavailable(String),
    /// The feedback strategy rejected the model.
    #[error("transform error: {0}")]
    Transform(String),
    /// The task was cancelled.
    #[error("cancelled")]
    Cancelled,
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Failure of unknown origin; always escalated.
    #[error("unknown failure: {0}")]
    Unknown(String),
}

impl SchedulerError {
    /// Whether this error signals broken pool bookkeeping rather than an
    /// expected runtime failure.
    pub const fn is_logic_violation(&self) -> bool {
        matches!(
            self,
            Self::OverCommit { .. } | Self::ReleaseMismatch { .. } | Self::UnknownResource(_)
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
