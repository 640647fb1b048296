//! Runtime adapters and the operator-facing API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{health, submit, submit_in_background, utilization_snapshot, Health, TaskSubmission, UtilizationSnapshot};
pub use tokio_spawner::{Spawn, TokioSpawner};
