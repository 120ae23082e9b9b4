//! Scheduler cadence parsing from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// How often each cycle step runs under `mlsignal run`
#[derive(Debug, Clone)]
pub struct ScheduleEnvConfig {
    pub inference_every: Duration,
    pub training_every: Duration,
    pub resolve_every: Duration,
}

impl Default for ScheduleEnvConfig {
    fn default() -> Self {
        Self {
            inference_every: Duration::from_secs(300),
            training_every: Duration::from_secs(86_400),
            resolve_every: Duration::from_secs(900),
        }
    }
}

impl ScheduleEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            inference_every: Self::parse_secs("ML_INFERENCE_EVERY_SECS", defaults.inference_every)?,
            training_every: Self::parse_secs("ML_TRAINING_EVERY_SECS", defaults.training_every)?,
            resolve_every: Self::parse_secs("ML_RESOLVE_EVERY_SECS", defaults.resolve_every)?,
        })
    }

    fn parse_secs(key: &str, default: Duration) -> Result<Duration> {
        let secs = env::var(key)
            .unwrap_or_else(|_| default.as_secs().to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))?;
        if secs == 0 {
            anyhow::bail!("{} must be greater than zero", key);
        }
        Ok(Duration::from_secs(secs))
    }
}
