//! Audit sink implementations.
//!
//! The scheduler reports lifecycle events to an optional sink. Sinks are
//! observers only: a sink error is logged and never changes an outcome.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;
use crate::util::clock::now_ms;

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Task accepted for scheduling.
    Submission,
    /// Capacity reserved on a resource.
    Reservation,
    /// Capacity returned to a resource.
    Release,
    /// Task finished successfully.
    Success,
    /// Task failed terminally.
    Failure,
    /// Task will be retried after a backoff.
    Retry,
    /// Failure handed to the operator.
    Escalation,
    /// Task cancelled.
    Cancellation,
}

impl EventKind {
    /// Stable event name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Reservation => "reservation",
            Self::Release => "release",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Retry => "retry",
            Self::Escalation => "escalation",
            Self::Cancellation => "cancellation",
        }
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub event_kind: EventKind,
    /// Related task identifier.
    pub task_id: String,
    /// Resource involved, if any.
    pub resource_id: Option<String>,
    /// Additional context.
    pub detail: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent) -> AppResult<()>;
}

/// In-memory audit sink for testing and dev.
///
/// Clones share the same buffer, so a handle can be kept after the sink is
/// handed to the scheduler.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Events for one task, in recording order.
    pub fn events_for(&self, task_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) -> AppResult<()> {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
        Ok(())
    }
}

/// Forwards audit events to `tracing` under the `acmf_scheduler::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) -> AppResult<()> {
        tracing::info!(
            target: "acmf_scheduler::audit",
            event_kind = event.event_kind.as_str(),
            task_id = %event.task_id,
            resource_id = event.resource_id.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    event_kind: EventKind,
    task_id: impl Into<String>,
    resource_id: Option<&str>,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_kind,
        task_id: task_id.into(),
        resource_id: resource_id.map(str::to_string),
        detail,
        created_at_ms: now_ms(),
    }
}
