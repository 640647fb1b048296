//! Core scheduling abstractions, capacity accounting, and recovery.

pub mod audit;
pub mod error;
pub mod recovery;
pub mod resource_pool;
pub mod scheduler;
pub mod upgrade;

pub use audit::{build_audit_event, AuditEvent, AuditSink, EventKind, InMemoryAuditSink, TracingAuditSink};
pub use error::{AppResult, SchedulerError};
pub use recovery::{
    Backoff, Classification, FailureKind, FailureRecord, RecoveryOutcome, RecoveryPolicy,
};
pub use resource_pool::{Reservation, Resource, ResourcePool};
pub use scheduler::{Outcome, Scheduler, SchedulerStats, Task, TaskKind, TaskResult, TaskStatus};
pub use upgrade::{
    FeedbackStrategy, KnowledgeResult, KnowledgeSource, MergeKnowledge, Model, StaticKnowledgeSource,
    UpgradeEngine, UpgradeRequest,
};
