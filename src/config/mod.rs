//! Configuration module for the ML signal service.
//!
//! Structured configuration loading from environment variables, organized by
//! concern: ML pipeline, scheduling, and observability.

mod ml_config;
mod observability_config;
mod schedule_config;

pub use ml_config::MlEnvConfig;
pub use observability_config::{LogFormat, ObservabilityEnvConfig};
pub use schedule_config::ScheduleEnvConfig;

use anyhow::{Context, Result};
use std::env;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://mlsignal.db";

/// Main application configuration.
///
/// Aggregates the sub-configs; each one can also be loaded on its own.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub ml: MlEnvConfig,
    pub schedule: ScheduleEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a local `.env` file.
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let ml = MlEnvConfig::from_env().context("Failed to load ML config")?;
        let schedule = ScheduleEnvConfig::from_env().context("Failed to load schedule config")?;
        let observability = ObservabilityEnvConfig::from_env();

        Ok(Self {
            database_url,
            ml,
            schedule,
            observability,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            ml: MlEnvConfig::default(),
            schedule: ScheduleEnvConfig::default(),
            observability: ObservabilityEnvConfig::default(),
        }
    }
}
