//! API-facing request/response models.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::core::{
    FeedbackStrategy, KnowledgeSource, Outcome, Resource, Scheduler, SchedulerError, Task,
};
use crate::runtime::Spawn;
use crate::util::{new_task_id, now_ms};

/// Task submission payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Task identifier; generated when absent.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Task kind (`allocate` or `upgrade`).
    pub kind: String,
    /// Opaque payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Resource cost.
    pub cost: u32,
}

/// Utilization snapshot for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationSnapshot {
    /// Per-resource state, ordered by id.
    pub resources: Vec<Resource>,
    /// Capture time (ms since epoch).
    pub captured_at_ms: u128,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Submit a task described by an API request.
pub async fn submit<K, F>(scheduler: &Scheduler<K, F>, req: TaskSubmission) -> Result<Outcome, SchedulerError>
where
    K: KnowledgeSource,
    F: FeedbackStrategy,
{
    let id = req.task_id.unwrap_or_else(new_task_id);
    scheduler.submit_named(id, &req.kind, req.payload, req.cost).await
}

/// Submit a task on `spawner` and return a receiver for its outcome.
pub fn submit_in_background<K, F, S>(
    scheduler: &Arc<Scheduler<K, F>>,
    spawner: &S,
    task: Task,
) -> oneshot::Receiver<Result<Outcome, SchedulerError>>
where
    K: KnowledgeSource,
    F: FeedbackStrategy,
    S: Spawn,
{
    let (tx, rx) = oneshot::channel();
    let scheduler = Arc::clone(scheduler);
    spawner.spawn(async move {
        let outcome = scheduler.submit(task).await;
        if tx.send(outcome).is_err() {
            tracing::debug!("background submission receiver dropped");
        }
    });
    rx
}

/// Snapshot the pool for observability.
pub fn utilization_snapshot<K, F>(scheduler: &Scheduler<K, F>) -> UtilizationSnapshot
where
    K: KnowledgeSource,
    F: FeedbackStrategy,
{
    UtilizationSnapshot {
        resources: scheduler.pool().resources(),
        captured_at_ms: now_ms(),
    }
}

/// Return a health payload.
pub const fn health() -> Health {
    Health { ok: true }
}
