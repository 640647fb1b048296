//! In-memory FIFO of tasks waiting for capacity.

use std::collections::VecDeque;

use crate::util::TaskId;

/// Tasks parked because no resource could take them, in arrival order.
///
/// A task may only be placed when nothing is parked or it is at the front.
#[derive(Debug, Default)]
pub struct InMemoryWaitQueue {
    parked: VecDeque<TaskId>,
}

impl InMemoryWaitQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `task_id` may attempt placement now.
    pub fn is_turn(&self, task_id: &str) -> bool {
        self.parked.front().is_none_or(|front| front == task_id)
    }

    /// Park a task at the back unless it is already parked.
    pub fn park(&mut self, task_id: &str) {
        if !self.contains(task_id) {
            self.parked.push_back(task_id.to_string());
        }
    }

    /// Remove a task wherever it is. Returns whether it was parked.
    pub fn leave(&mut self, task_id: &str) -> bool {
        match self.parked.iter().position(|id| id == task_id) {
            Some(idx) => {
                self.parked.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Whether a task is parked.
    pub fn contains(&self, task_id: &str) -> bool {
        self.parked.iter().any(|id| id == task_id)
    }

    /// Number of parked tasks.
    pub fn len(&self) -> usize {
        self.parked.len()
    }

    /// Whether nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
