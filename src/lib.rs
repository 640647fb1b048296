//! # ACMF Scheduler
//!
//! A task-to-resource scheduler with integrated failure recovery.
//!
//! A central [`Scheduler`](core::Scheduler) accepts tasks, places them on a
//! finite-capacity [`ResourcePool`](core::ResourcePool), executes them, and
//! routes every failure through a [`RecoveryPolicy`](core::RecoveryPolicy)
//! that decides whether to retry, fail, or escalate.
//!
//! ## Key Features
//!
//! - **Deterministic placement**: lowest utilization first, ties broken by resource id
//! - **Atomic select-then-reserve**: concurrent submissions never over-commit a resource
//! - **Typed outcomes**: `Success`, `Recovered`, `Failed`, and `Escalated`; expected
//!   failures never surface as errors
//! - **Bounded exponential backoff** with seeded jitter, capped and non-decreasing
//! - **Model upgrades** through a pluggable `FeedbackStrategy` backed by an external
//!   `KnowledgeSource`
//! - **Cooperative cancellation** before placement, during backoff, and between
//!   knowledge queries
//! - **Audit sinks** receiving structured lifecycle events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use acmf_scheduler::builders::SchedulerBuilder;
//! use acmf_scheduler::core::{MergeKnowledge, Outcome, StaticKnowledgeSource, TracingAuditSink};
//!
//! let scheduler = SchedulerBuilder::from_json_str(r#"{
//!     "pool": { "resources": [ { "id": "A", "capacity": 10 }, { "id": "B", "capacity": 5 } ] },
//!     "options": { "max_retries": 3, "backoff_base_ms": 50, "backoff_max_ms": 2000, "jitter_fraction": 0.1 }
//! }"#)?
//! .with_audit(Box::new(TracingAuditSink))
//! .build(StaticKnowledgeSource::new(), MergeKnowledge)?;
//!
//! match scheduler.submit_task("allocate", serde_json::Value::Null, 6).await? {
//!     Outcome::Success { result } | Outcome::Recovered { result, .. } => println!("{result:?}"),
//!     Outcome::Failed { reason, message } => eprintln!("{reason}: {message}"),
//!     Outcome::Escalated { record } => page_operator(record),
//! }
//! ```
//!
//! For complete examples, see `tests/scheduler_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, capacity accounting, and recovery.
pub mod core;
/// Configuration models for resources and recovery options.
pub mod config;
/// Builders to construct the scheduler from configuration.
pub mod builders;
/// Infrastructure adapters backing the scheduler.
pub mod infra;
/// Runtime adapters and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
