//! Configuration models for resources, recovery options, and the scheduler.

pub mod options;
pub mod pool;

pub use options::SchedulerOptions;
pub use pool::{PoolConfig, ResourceConfig, SchedulerConfig};
