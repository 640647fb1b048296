//! Failure classification, retry decisions, and bounded exponential backoff.
//!
//! Every failure goes through the same steps: it is observed as a
//! [`FailureRecord`], classified, and then retried, escalated, or dropped.
//! The policy never sleeps itself; it hands the caller a [`Backoff`] that
//! produces the delays.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::SchedulerOptions;
use crate::core::SchedulerError;
use crate::util::{now_ms, TaskId};

/// Kind of failure, derived from the error that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Task failed validation.
    InvalidTask,
    /// No resource could take the task.
    NoCapacity,
    /// Reservation exceeded capacity.
    OverCommit,
    /// Release without a matching reservation.
    ReleaseMismatch,
    /// Knowledge source could not answer.
    KnowledgeUnavailable,
    /// Feedback strategy rejected the model.
    TransformError,
    /// Task was cancelled.
    Cancelled,
    /// Anything else.
    Unknown,
}

impl FailureKind {
    /// Stable name used in logs and audit events.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidTask => "invalid_task",
            Self::NoCapacity => "no_capacity",
            Self::OverCommit => "over_commit",
            Self::ReleaseMismatch => "release_mismatch",
            Self::KnowledgeUnavailable => "knowledge_unavailable",
            Self::TransformError => "transform_error",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SchedulerError> for FailureKind {
    fn from(err: &SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidTask(_) => Self::InvalidTask,
            SchedulerError::NoCapacity => Self::NoCapacity,
            SchedulerError::OverCommit { .. } => Self::OverCommit,
            SchedulerError::ReleaseMismatch { .. } => Self::ReleaseMismatch,
            SchedulerError::KnowledgeUnavailable(_) => Self::KnowledgeUnavailable,
            SchedulerError::Transform(_) => Self::TransformError,
            SchedulerError::Cancelled => Self::Cancelled,
            SchedulerError::UnknownResource(_)
            | SchedulerError::InvalidConfig(_)
            | SchedulerError::Unknown(_) => Self::Unknown,
        }
    }
}

/// Structured description of one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// What went wrong.
    pub kind: FailureKind,
    /// Rendered error message.
    pub message: String,
    /// Where it happened (e.g. `placement`, `upgrade`).
    pub context: String,
    /// Task the failure relates to.
    pub task_id: TaskId,
    /// Milliseconds since epoch.
    pub at_ms: u128,
}

impl FailureRecord {
    /// Build a record from an error.
    pub fn from_error(err: &SchedulerError, context: impl Into<String>, task_id: impl Into<TaskId>) -> Self {
        Self {
            kind: FailureKind::from(err),
            message: err.to_string(),
            context: context.into(),
            task_id: task_id.into(),
            at_ms: now_ms(),
        }
    }
}

/// How a failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Worth retrying.
    Transient,
    /// Not worth retrying.
    Permanent,
    /// Needs an operator.
    Unknown,
}

/// Decision returned by [`RecoveryPolicy::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Retry after the next backoff delay; the caller decrements its budget.
    Retry,
    /// Give up and report the failure.
    FailFinal,
    /// Propagate to the operator.
    Escalate,
}

/// Classifies failures and decides between retry, fail, and escalate.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    options: SchedulerOptions,
    overrides: HashMap<FailureKind, Classification>,
}

impl RecoveryPolicy {
    /// Create a policy from options.
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            overrides: HashMap::new(),
        }
    }

    /// Override the classification of one failure kind.
    #[must_use]
    pub fn with_classification(mut self, kind: FailureKind, class: Classification) -> Self {
        self.overrides.insert(kind, class);
        self
    }

    /// Same classification rules with new options.
    #[must_use]
    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Options this policy was built from.
    pub const fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Retry budget for a fresh submission.
    pub const fn max_retries(&self) -> u32 {
        self.options.max_retries
    }

    /// Map a failure to a classification.
    pub fn classify(&self, record: &FailureRecord) -> Classification {
        if let Some(class) = self.overrides.get(&record.kind) {
            return *class;
        }
        match record.kind {
            FailureKind::NoCapacity | FailureKind::KnowledgeUnavailable => Classification::Transient,
            FailureKind::InvalidTask | FailureKind::TransformError | FailureKind::Cancelled => {
                Classification::Permanent
            }
            FailureKind::OverCommit | FailureKind::ReleaseMismatch | FailureKind::Unknown => {
                Classification::Unknown
            }
        }
    }

    /// Decide what to do with a failure given the remaining retry budget.
    pub fn handle(&self, record: &FailureRecord, retry_budget: u32) -> RecoveryOutcome {
        let class = self.classify(record);
        let outcome = match class {
            Classification::Transient if retry_budget > 0 => RecoveryOutcome::Retry,
            Classification::Transient | Classification::Permanent => RecoveryOutcome::FailFinal,
            Classification::Unknown => RecoveryOutcome::Escalate,
        };
        tracing::debug!(
            task_id = %record.task_id,
            kind = %record.kind,
            context = %record.context,
            ?class,
            ?outcome,
            retry_budget,
            "failure classified"
        );
        outcome
    }

    /// Backoff schedule for one task. The jitter sequence depends only on the
    /// configured seed and the task id.
    pub fn backoff_for(&self, task_id: &str) -> Backoff {
        Backoff::new(&self.options, self.options.jitter_seed ^ fnv1a(task_id.as_bytes()))
    }
}

/// 64-bit FNV-1a. Stable across toolchains, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(SchedulerOptions::default())
    }
}

/// Exponential backoff: `base * 2^n`, capped, with seeded jitter.
///
/// Delays never decrease and never exceed `backoff_max_ms`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter: f64,
    attempt: u32,
    last_ms: u64,
    rng: StdRng,
}

impl Backoff {
    /// Create a schedule from options with an explicit seed.
    pub fn new(options: &SchedulerOptions, seed: u64) -> Self {
        Self {
            base_ms: options.backoff_base_ms,
            max_ms: options.backoff_max_ms,
            jitter: options.jitter_fraction,
            attempt: 0,
            last_ms: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Number of delays produced so far.
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Next delay in the schedule.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(self.attempt))
            .min(self.max_ms);
        let jittered = if self.jitter > 0.0 {
            let factor = 1.0 + self.rng.random_range(-self.jitter..=self.jitter);
            (nominal as f64 * factor).round().max(0.0) as u64
        } else {
            nominal
        };
        let delay = jittered.min(self.max_ms).max(self.last_ms);
        self.last_ms = delay;
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay)
    }
}
