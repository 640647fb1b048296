//! Identifier types shared across the scheduler.

/// Task identifier, unique within a scheduling epoch.
pub type TaskId = String;

/// Resource identifier. Ordering of ids is used for deterministic tie-breaks.
pub type ResourceId = String;

/// Generate a fresh task identifier.
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_id_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
