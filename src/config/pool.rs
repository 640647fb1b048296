//! Pool and scheduler configuration structures.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::SchedulerOptions;

/// A single resource definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource identifier.
    pub id: String,
    /// Capacity in resource units.
    pub capacity: u32,
}

/// Pool configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Resources managed by the pool.
    pub resources: Vec<ResourceConfig>,
}

/// Root scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Resource pool definition.
    pub pool: PoolConfig,
    /// Retry and backoff options.
    #[serde(default)]
    pub options: SchedulerOptions,
}

impl PoolConfig {
    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.resources.is_empty() {
            return Err("at least one resource must be defined".into());
        }
        let mut seen = HashSet::new();
        for res in &self.resources {
            if res.id.trim().is_empty() {
                return Err("resource id must not be empty".into());
            }
            if res.capacity == 0 {
                return Err(format!("resource `{}` must have capacity > 0", res.id));
            }
            if !seen.insert(res.id.as_str()) {
                return Err(format!("duplicate resource `{}`", res.id));
            }
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate the pool and the options.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        self.options
            .validate()
            .map_err(|e| format!("options invalid: {e}"))
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
