//! Builder that turns a `SchedulerConfig` into a running `Scheduler`.

use crate::config::SchedulerConfig;
use crate::core::{
    AuditSink, Classification, FailureKind, FeedbackStrategy, KnowledgeSource, RecoveryPolicy,
    ResourcePool, Scheduler, SchedulerError, UpgradeEngine,
};

/// Assembles a scheduler from configuration and collaborators.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    audit: Option<Box<dyn AuditSink>>,
    overrides: Vec<(FailureKind, Classification)>,
}

impl SchedulerBuilder {
    /// Start from a configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            audit: None,
            overrides: Vec::new(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(input: &str) -> Result<Self, SchedulerError> {
        SchedulerConfig::from_json_str(input)
            .map(Self::new)
            .map_err(SchedulerError::InvalidConfig)
    }

    /// Configuration the builder holds.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Override how a failure kind is classified.
    #[must_use]
    pub fn with_classification(mut self, kind: FailureKind, class: Classification) -> Self {
        self.overrides.push((kind, class));
        self
    }

    /// Validate the configuration and build the scheduler.
    pub fn build<K, F>(self, knowledge: K, strategy: F) -> Result<Scheduler<K, F>, SchedulerError>
    where
        K: KnowledgeSource,
        F: FeedbackStrategy,
    {
        self.config
            .validate()
            .map_err(|e| SchedulerError::InvalidConfig(format!("config invalid: {e}")))?;

        let pool = ResourcePool::from_config(&self.config.pool)?;
        let policy = self
            .overrides
            .into_iter()
            .fold(RecoveryPolicy::new(self.config.options), |policy, (kind, class)| {
                policy.with_classification(kind, class)
            });
        tracing::info!(
            resources = self.config.pool.resources.len(),
            max_retries = policy.max_retries(),
            "scheduler built"
        );

        let scheduler = Scheduler::new(pool, UpgradeEngine::new(knowledge, strategy), policy);
        Ok(match self.audit {
            Some(audit) => scheduler.with_audit(audit),
            None => scheduler,
        })
    }
}
