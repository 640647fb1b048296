//! Scheduler: validation, placement, execution, and recovery.
//!
//! `submit` is the single entry point. A task is validated, placed on the
//! resource pool, executed, and released. Every failure becomes a
//! [`FailureRecord`] that the [`RecoveryPolicy`] turns into a retry, a final
//! failure, or an escalation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerOptions;
use crate::core::audit::{build_audit_event, AuditSink, EventKind};
use crate::core::recovery::{FailureKind, FailureRecord, RecoveryOutcome, RecoveryPolicy};
use crate::core::resource_pool::{Reservation, ResourcePool};
use crate::core::upgrade::{FeedbackStrategy, KnowledgeSource, Model, UpgradeEngine, UpgradeRequest};
use crate::core::SchedulerError;
use crate::infra::InMemoryWaitQueue;
use crate::util::{new_task_id, now_ms, ResourceId, TaskId};

/// What a task asks the scheduler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Reserve capacity and record the allocation.
    Allocate,
    /// Upgrade a model through the upgrade engine.
    Upgrade,
}

impl TaskKind {
    /// Stable kind name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allocate => "allocate",
            Self::Upgrade => "upgrade",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "allocate" => Ok(Self::Allocate),
            "upgrade" => Ok(Self::Upgrade),
            other => Err(SchedulerError::InvalidTask(format!("unknown task kind `{other}`"))),
        }
    }
}

/// Status of a task in the scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Accepted, waiting for placement (or for a retry).
    Pending,
    /// Holding a reservation and executing.
    Running,
    /// Finished on the first attempt.
    Completed,
    /// Finished after at least one retry.
    Recovered,
    /// Failed, cancelled, or escalated.
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a final status.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Recovered | Self::Failed)
    }
}

/// A unit of work submitted to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within the current epoch.
    pub id: TaskId,
    /// What to do.
    pub kind: TaskKind,
    /// Opaque payload; `upgrade` tasks carry an [`UpgradeRequest`].
    pub payload: serde_json::Value,
    /// Resource units the task occupies while running.
    pub cost: u32,
    /// Current status.
    pub status: TaskStatus,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
}

impl Task {
    /// Create a pending task.
    pub fn new(id: impl Into<TaskId>, kind: TaskKind, payload: serde_json::Value, cost: u32) -> Self {
        Self {
            id: id.into(),
            kind,
            payload,
            cost,
            status: TaskStatus::Pending,
            created_at_ms: now_ms(),
        }
    }

    /// Allocation task with an empty payload.
    pub fn allocate(id: impl Into<TaskId>, cost: u32) -> Self {
        Self::new(id, TaskKind::Allocate, serde_json::Value::Null, cost)
    }

    /// Upgrade task carrying `request`.
    pub fn upgrade(id: impl Into<TaskId>, request: &UpgradeRequest, cost: u32) -> Result<Self, SchedulerError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| SchedulerError::InvalidTask(format!("unserializable upgrade request: {e}")))?;
        Ok(Self::new(id, TaskKind::Upgrade, payload, cost))
    }
}

/// Result of a successfully executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TaskResult {
    /// Capacity was allocated on a resource.
    Allocated {
        /// Resource that took the task.
        resource_id: ResourceId,
        /// Units allocated.
        units: u32,
    },
    /// A model was upgraded.
    Upgraded {
        /// Resource that ran the upgrade.
        resource_id: ResourceId,
        /// The upgraded model.
        model: Model,
    },
}

/// Terminal result of a submission.
#[must_use = "an escalated outcome must be handled by the caller"]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    /// Succeeded on the first attempt.
    Success {
        /// Task result.
        result: TaskResult,
    },
    /// Succeeded after retries.
    Recovered {
        /// Task result.
        result: TaskResult,
        /// Attempts made, including the successful one.
        attempts: u32,
    },
    /// Failed for an expected reason.
    Failed {
        /// Failure kind.
        reason: FailureKind,
        /// Rendered error.
        message: String,
    },
    /// Failure the policy could not classify; needs an operator.
    Escalated {
        /// The failure being escalated.
        record: FailureRecord,
    },
}

impl Outcome {
    /// Whether the task produced a result.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Recovered { .. })
    }

    /// Result of a successful task.
    pub const fn result(&self) -> Option<&TaskResult> {
        match self {
            Self::Success { result } | Self::Recovered { result, .. } => Some(result),
            Self::Failed { .. } | Self::Escalated { .. } => None,
        }
    }

    /// Failure kind of an unsuccessful task.
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { reason, .. } => Some(*reason),
            Self::Escalated { record } => Some(record.kind),
            Self::Success { .. } | Self::Recovered { .. } => None,
        }
    }
}

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks submitted, including rejected ones.
    pub submitted: u64,
    /// Tasks completed on the first attempt.
    pub completed: u64,
    /// Tasks completed after retries.
    pub recovered: u64,
    /// Tasks that failed (including validation rejections and cancellations).
    pub failed: u64,
    /// Tasks escalated to the operator.
    pub escalated: u64,
    /// Retries scheduled across all tasks.
    pub retries: u64,
    /// Cancellation requests accepted.
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    recovered: AtomicU64,
    failed: AtomicU64,
    escalated: AtomicU64,
    retries: AtomicU64,
    cancelled: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

struct TaskEntry {
    status: TaskStatus,
    cancel: CancellationToken,
}

/// Validated task body.
enum Work {
    Allocate,
    Upgrade(UpgradeRequest),
}

impl Work {
    const fn context(&self) -> &'static str {
        match self {
            Self::Allocate => "allocation",
            Self::Upgrade(_) => "upgrade",
        }
    }
}

/// Returns its units to the pool on drop unless released explicitly, so a
/// dropped `submit` future cannot leak load.
struct HeldReservation<'a> {
    pool: &'a ResourcePool,
    reservation: Option<Reservation>,
}

impl<'a> HeldReservation<'a> {
    const fn new(pool: &'a ResourcePool, reservation: Reservation) -> Self {
        Self {
            pool,
            reservation: Some(reservation),
        }
    }

    fn release(mut self) -> Result<(), SchedulerError> {
        match self.reservation.take() {
            Some(r) => self.pool.release_reservation(&r),
            None => Ok(()),
        }
    }
}

impl Drop for HeldReservation<'_> {
    fn drop(&mut self) {
        if let Some(r) = self.reservation.take() {
            tracing::warn!(resource = %r.resource_id, units = r.units, "releasing abandoned reservation");
            if let Err(e) = self.pool.release_reservation(&r) {
                tracing::error!(error = %e, "failed to release abandoned reservation");
            }
        }
    }
}

/// Lives for one registered submission. On drop the task leaves the wait
/// queue, and a task that never reached a final status is marked failed, so
/// an abandoned `submit` future cannot block admission or pin its id.
struct Registration<'a> {
    task_id: TaskId,
    tasks: &'a Mutex<HashMap<TaskId, TaskEntry>>,
    waiting: &'a Mutex<InMemoryWaitQueue>,
    counters: &'a Counters,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.waiting.lock().leave(&self.task_id);
        let abandoned = match self.tasks.lock().get_mut(&self.task_id) {
            Some(entry) if !entry.status.is_terminal() => {
                entry.status = TaskStatus::Failed;
                entry.cancel.cancel();
                true
            }
            _ => false,
        };
        if abandoned {
            Counters::bump(&self.counters.failed);
            tracing::warn!(task_id = %self.task_id, "submission dropped before completion");
        }
    }
}

/// Central coordinator dispatching tasks to the resource pool under a
/// recovery policy.
pub struct Scheduler<K, F> {
    pool: ResourcePool,
    engine: UpgradeEngine<K, F>,
    policy: RwLock<Arc<RecoveryPolicy>>,
    // Current epoch only; shrinks on `reset_epoch`.
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    waiting: Mutex<InMemoryWaitQueue>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
    counters: Counters,
}

impl<K, F> Scheduler<K, F>
where
    K: KnowledgeSource,
    F: FeedbackStrategy,
{
    /// Create a scheduler from its components.
    pub fn new(pool: ResourcePool, engine: UpgradeEngine<K, F>, policy: RecoveryPolicy) -> Self {
        Self {
            pool,
            engine,
            policy: RwLock::new(Arc::new(policy)),
            tasks: Mutex::new(HashMap::new()),
            waiting: Mutex::new(InMemoryWaitQueue::new()),
            audit: None,
            counters: Counters::default(),
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Underlying resource pool.
    pub const fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    /// Submit a task of `kind` with a generated id.
    pub async fn submit_task(
        &self,
        kind: &str,
        payload: serde_json::Value,
        cost: u32,
    ) -> Result<Outcome, SchedulerError> {
        self.submit_named(new_task_id(), kind, payload, cost).await
    }

    /// Submit a task of `kind` under a caller-chosen id. An unrecognized kind
    /// is rejected as an invalid task.
    pub async fn submit_named(
        &self,
        id: TaskId,
        kind: &str,
        payload: serde_json::Value,
        cost: u32,
    ) -> Result<Outcome, SchedulerError> {
        match kind.parse::<TaskKind>() {
            Ok(kind) => self.submit(Task::new(id, kind, payload, cost)).await,
            Err(err) => {
                Counters::bump(&self.counters.submitted);
                Ok(self.reject(&id, &err))
            }
        }
    }

    /// Submit a task and drive it to a terminal outcome.
    ///
    /// Expected failures come back as `Outcome::Failed` or
    /// `Outcome::Escalated`. `Err` is reserved for broken pool bookkeeping.
    pub async fn submit(&self, mut task: Task) -> Result<Outcome, SchedulerError> {
        Counters::bump(&self.counters.submitted);
        tracing::info!(task_id = %task.id, kind = %task.kind, cost = task.cost, "task submitted");
        self.emit(
            EventKind::Submission,
            &task.id,
            None,
            Some(format!("kind={} cost={}", task.kind, task.cost)),
        );

        let work = match self.validate(&task) {
            Ok(work) => work,
            Err(err) => return Ok(self.reject(&task.id, &err)),
        };
        let cancel = match self.register(&task) {
            Ok(token) => token,
            Err(err) => return Ok(self.reject(&task.id, &err)),
        };
        let _registration = Registration {
            task_id: task.id.clone(),
            tasks: &self.tasks,
            waiting: &self.waiting,
            counters: &self.counters,
        };

        let result = self.drive(&mut task, &work, &cancel).await;
        if let Err(err) = &result {
            tracing::error!(task_id = %task.id, error = %err, "scheduler invariant violated");
            Counters::bump(&self.counters.failed);
            self.set_status(&mut task, TaskStatus::Failed);
        }
        result
    }

    /// Request cancellation. Pending tasks fail at their next check; running
    /// upgrades stop before their next knowledge query. Returns `false` for
    /// unknown or finished tasks.
    pub fn cancel(&self, task_id: &str) -> bool {
        let accepted = {
            let tasks = self.tasks.lock();
            match tasks.get(task_id) {
                Some(entry) if !entry.status.is_terminal() => {
                    entry.cancel.cancel();
                    true
                }
                _ => false,
            }
        };
        if accepted {
            Counters::bump(&self.counters.cancelled);
            tracing::info!(task_id, "cancellation requested");
            self.emit(EventKind::Cancellation, task_id, None, None);
        }
        accepted
    }

    /// Status of a task seen in the current epoch.
    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.lock().get(task_id).map(|e| e.status)
    }

    /// Start a new epoch: forget finished tasks so their ids can be reused.
    /// Tasks still in flight are kept.
    ///
    /// Finished tasks are otherwise retained for `status` and duplicate-id
    /// checks, so a long-running service must call this periodically to
    /// bound memory. [`Scheduler::tracked_tasks`] reports the current size.
    pub fn reset_epoch(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, e| !e.status.is_terminal());
        before - tasks.len()
    }

    /// Number of tasks remembered in the current epoch, finished or not.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Resource id to utilization ratio.
    pub fn get_utilization(&self) -> BTreeMap<ResourceId, f64> {
        self.pool.utilization()
    }

    /// Replace the retry and backoff options. In-flight submissions keep the
    /// options they started with.
    pub fn configure(&self, options: SchedulerOptions) -> Result<(), SchedulerError> {
        options.validate().map_err(SchedulerError::InvalidConfig)?;
        let mut policy = self.policy.write();
        let next = policy.as_ref().clone().with_options(options);
        *policy = Arc::new(next);
        tracing::info!(options = ?policy.options(), "scheduler reconfigured");
        Ok(())
    }

    /// Options currently in effect.
    pub fn options(&self) -> SchedulerOptions {
        self.policy.read().options().clone()
    }

    /// Snapshot of activity counters.
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }

    fn validate(&self, task: &Task) -> Result<Work, SchedulerError> {
        if task.id.trim().is_empty() {
            return Err(SchedulerError::InvalidTask("task id must not be empty".into()));
        }
        if task.cost == 0 {
            return Err(SchedulerError::InvalidTask("task cost must be greater than 0".into()));
        }
        let max = self.pool.max_capacity();
        if task.cost > max {
            return Err(SchedulerError::InvalidTask(format!(
                "task cost {} exceeds the largest resource capacity {max}",
                task.cost
            )));
        }
        match task.kind {
            TaskKind::Allocate => Ok(Work::Allocate),
            TaskKind::Upgrade => serde_json::from_value::<UpgradeRequest>(task.payload.clone())
                .map(Work::Upgrade)
                .map_err(|e| SchedulerError::InvalidTask(format!("malformed upgrade payload: {e}"))),
        }
    }

    fn register(&self, task: &Task) -> Result<CancellationToken, SchedulerError> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::InvalidTask(format!(
                "duplicate task id `{}` in current epoch",
                task.id
            )));
        }
        let cancel = CancellationToken::new();
        tasks.insert(
            task.id.clone(),
            TaskEntry {
                status: TaskStatus::Pending,
                cancel: cancel.clone(),
            },
        );
        Ok(cancel)
    }

    async fn drive(
        &self,
        task: &mut Task,
        work: &Work,
        cancel: &CancellationToken,
    ) -> Result<Outcome, SchedulerError> {
        let policy = self.policy.read().clone();
        let mut backoff = policy.backoff_for(&task.id);
        let mut budget = policy.max_retries();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let (err, context) = if cancel.is_cancelled() {
                (SchedulerError::Cancelled, "pending")
            } else if let Some(reservation) = self.place(&task.id, task.cost)? {
                self.set_status(task, TaskStatus::Running);
                let resource_id = reservation.resource_id.clone();
                let held = HeldReservation::new(&self.pool, reservation);
                let executed = self.execute(work, &resource_id, task.cost, cancel).await;
                held.release()?;
                self.emit(EventKind::Release, &task.id, Some(&resource_id), None);
                match executed {
                    Ok(result) => return Ok(self.complete(task, result, attempts)),
                    Err(err) => (err, work.context()),
                }
            } else {
                (SchedulerError::NoCapacity, "placement")
            };

            if err.is_logic_violation() {
                return Err(err);
            }
            let record = FailureRecord::from_error(&err, context, task.id.clone());
            match policy.handle(&record, budget) {
                RecoveryOutcome::Retry => {
                    budget -= 1;
                    self.set_status(task, TaskStatus::Pending);
                    let delay = backoff.next_delay();
                    Counters::bump(&self.counters.retries);
                    tracing::warn!(
                        task_id = %task.id,
                        reason = %record.kind,
                        attempt = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying task"
                    );
                    self.emit(
                        EventKind::Retry,
                        &task.id,
                        None,
                        Some(format!("reason={} attempt={attempts} delay={delay:?}", record.kind)),
                    );
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryOutcome::FailFinal => return Ok(self.fail(task, record)),
                RecoveryOutcome::Escalate => return Ok(self.escalate(task, record)),
            }
        }
    }

    /// Place a task unless tasks parked before it are still waiting.
    fn place(&self, task_id: &str, cost: u32) -> Result<Option<Reservation>, SchedulerError> {
        let placed = {
            let mut waiting = self.waiting.lock();
            if waiting.is_turn(task_id) {
                let placed = self.pool.select_and_reserve(cost)?;
                if placed.is_some() {
                    waiting.leave(task_id);
                } else {
                    waiting.park(task_id);
                }
                placed
            } else {
                waiting.park(task_id);
                None
            }
        };
        if let Some(r) = &placed {
            tracing::debug!(task_id, resource = %r.resource_id, units = r.units, "task placed");
            self.emit(
                EventKind::Reservation,
                task_id,
                Some(&r.resource_id),
                Some(format!("units={}", r.units)),
            );
        }
        Ok(placed)
    }

    async fn execute(
        &self,
        work: &Work,
        resource_id: &str,
        units: u32,
        cancel: &CancellationToken,
    ) -> Result<TaskResult, SchedulerError> {
        match work {
            Work::Allocate => Ok(TaskResult::Allocated {
                resource_id: resource_id.to_string(),
                units,
            }),
            Work::Upgrade(request) => {
                let model = self
                    .engine
                    .upgrade(request.model.clone(), request.knowledge_query.as_deref(), cancel)
                    .await?;
                Ok(TaskResult::Upgraded {
                    resource_id: resource_id.to_string(),
                    model,
                })
            }
        }
    }

    fn complete(&self, task: &mut Task, result: TaskResult, attempts: u32) -> Outcome {
        let detail = format!("attempts={attempts}");
        if attempts > 1 {
            Counters::bump(&self.counters.recovered);
            self.set_status(task, TaskStatus::Recovered);
            tracing::info!(task_id = %task.id, attempts, "task recovered");
            self.emit(EventKind::Success, &task.id, None, Some(detail));
            Outcome::Recovered { result, attempts }
        } else {
            Counters::bump(&self.counters.completed);
            self.set_status(task, TaskStatus::Completed);
            tracing::info!(task_id = %task.id, "task completed");
            self.emit(EventKind::Success, &task.id, None, Some(detail));
            Outcome::Success { result }
        }
    }

    fn fail(&self, task: &mut Task, record: FailureRecord) -> Outcome {
        Counters::bump(&self.counters.failed);
        self.set_status(task, TaskStatus::Failed);
        tracing::warn!(task_id = %task.id, reason = %record.kind, error = %record.message, "task failed");
        self.emit(
            EventKind::Failure,
            &task.id,
            None,
            Some(format!("{}: {}", record.kind, record.message)),
        );
        Outcome::Failed {
            reason: record.kind,
            message: record.message,
        }
    }

    fn escalate(&self, task: &mut Task, record: FailureRecord) -> Outcome {
        Counters::bump(&self.counters.escalated);
        self.set_status(task, TaskStatus::Failed);
        tracing::error!(
            task_id = %task.id,
            context = %record.context,
            error = %record.message,
            "failure escalated"
        );
        self.emit(EventKind::Escalation, &task.id, None, Some(record.message.clone()));
        Outcome::Escalated { record }
    }

    fn reject(&self, task_id: &str, err: &SchedulerError) -> Outcome {
        Counters::bump(&self.counters.failed);
        tracing::warn!(task_id, error = %err, "task rejected");
        self.emit(EventKind::Failure, task_id, None, Some(err.to_string()));
        Outcome::Failed {
            reason: FailureKind::from(err),
            message: err.to_string(),
        }
    }

    fn set_status(&self, task: &mut Task, status: TaskStatus) {
        task.status = status;
        if let Some(entry) = self.tasks.lock().get_mut(&task.id) {
            entry.status = status;
        }
    }

    fn emit(&self, kind: EventKind, task_id: &str, resource_id: Option<&str>, detail: Option<String>) {
        if let Some(sink) = &self.audit {
            let event = build_audit_event(kind, task_id, resource_id, detail);
            if let Err(e) = sink.lock().record(event) {
                tracing::warn!(error = %e, event = kind.as_str(), "audit sink failed");
            }
        }
    }
}
