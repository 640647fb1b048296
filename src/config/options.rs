//! Retry and backoff options recognized by `Scheduler::configure`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Options controlling recovery behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerOptions {
    /// Maximum retries for a transient failure.
    pub max_retries: u32,
    /// First backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound for any backoff delay in milliseconds.
    pub backoff_max_ms: u64,
    /// Jitter applied to each delay, as a fraction of the delay (0.0..=1.0).
    pub jitter_fraction: f64,
    /// Seed for the jitter generator.
    pub jitter_seed: u64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 50,
            backoff_max_ms: 2_000,
            jitter_fraction: 0.1,
            jitter_seed: 0x00AC_3F00,
        }
    }
}

impl SchedulerOptions {
    /// Validate option values.
    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(format!(
                "backoff_base_ms ({}) must not exceed backoff_max_ms ({})",
                self.backoff_base_ms, self.backoff_max_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(format!(
                "jitter_fraction must be within 0.0..=1.0, got {}",
                self.jitter_fraction
            ));
        }
        Ok(())
    }

    /// Load options from the environment, reading a `.env` file first if present.
    ///
    /// Recognized variables: `ACMF_MAX_RETRIES`, `ACMF_BACKOFF_BASE_MS`,
    /// `ACMF_BACKOFF_MAX_MS`, `ACMF_JITTER_FRACTION`, `ACMF_JITTER_SEED`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine; real environment variables still apply.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build options from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut opts = Self::default();
        override_from(&lookup, "ACMF_MAX_RETRIES", &mut opts.max_retries)?;
        override_from(&lookup, "ACMF_BACKOFF_BASE_MS", &mut opts.backoff_base_ms)?;
        override_from(&lookup, "ACMF_BACKOFF_MAX_MS", &mut opts.backoff_max_ms)?;
        override_from(&lookup, "ACMF_JITTER_FRACTION", &mut opts.jitter_fraction)?;
        override_from(&lookup, "ACMF_JITTER_SEED", &mut opts.jitter_seed)?;
        opts.validate()?;
        Ok(opts)
    }
}

fn override_from<F, T>(lookup: &F, name: &str, slot: &mut T) -> Result<(), String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| format!("{name}: cannot parse `{raw}`: {e}"))?;
    }
    Ok(())
}
