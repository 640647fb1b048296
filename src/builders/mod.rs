//! Builders to construct scheduler components from configuration.

pub mod scheduler_builder;

pub use scheduler_builder::SchedulerBuilder;
