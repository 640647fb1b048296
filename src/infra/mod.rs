//! Infrastructure adapters backing the scheduler.

pub mod queue;
pub use queue::InMemoryWaitQueue;
