//! ML pipeline configuration parsing from environment variables.
//!
//! Covers training windows, inference thresholds, ensemble weights and the
//! anomaly detector.

use crate::application::ml::ensemble::EnsembleWeights;
use crate::application::ml::{InferenceConfig, IsolationForestOptions, TrainingConfig};
use crate::domain::market::timeframe::{Timeframe, parse_timeframe_list};
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use tracing::warn;

/// ML environment configuration
#[derive(Debug, Clone)]
pub struct MlEnvConfig {
    // Intervals
    pub intervals: Vec<Timeframe>,
    pub primary_interval: Timeframe,

    // Training
    pub train_window_days: i64,
    pub min_train_samples: usize,
    pub label_horizon_hours: i64,

    // Inference
    pub long_threshold: f64,
    pub short_threshold: f64,
    pub ensemble_threshold: f64,
    pub weights: EnsembleWeights,

    // Anomaly detection
    pub anomaly_enabled: bool,
    pub anomaly_threshold: f64,
    pub anomaly_damp_max: f64,
    pub isolation_forest: IsolationForestOptions,

    // Outcome resolution
    pub resolve_batch_size: usize,
}

impl Default for MlEnvConfig {
    fn default() -> Self {
        Self {
            intervals: vec![Timeframe::OneHour, Timeframe::FourHour],
            primary_interval: Timeframe::OneHour,
            train_window_days: 180,
            min_train_samples: 500,
            label_horizon_hours: 4,
            long_threshold: 0.55,
            short_threshold: 0.45,
            ensemble_threshold: 0.2,
            weights: EnsembleWeights::default(),
            anomaly_enabled: true,
            anomaly_threshold: 0.6,
            anomaly_damp_max: 0.5,
            isolation_forest: IsolationForestOptions::default(),
            resolve_batch_size: 500,
        }
    }
}

impl MlEnvConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let intervals = match env::var("ML_INTERVALS") {
            Ok(raw) => parse_timeframe_list(&raw).context("Failed to parse ML_INTERVALS")?,
            Err(_) => defaults.intervals.clone(),
        };
        let primary_interval = match env::var("ML_PRIMARY_INTERVAL") {
            Ok(raw) => {
                Timeframe::from_str(&raw).context("Failed to parse ML_PRIMARY_INTERVAL")?
            }
            Err(_) => defaults.primary_interval,
        };

        let config = Self {
            intervals,
            primary_interval,
            train_window_days: Self::parse_i64("ML_TRAIN_WINDOW_DAYS", defaults.train_window_days)?,
            min_train_samples: Self::parse_usize(
                "ML_MIN_TRAIN_SAMPLES",
                defaults.min_train_samples,
            )?,
            label_horizon_hours: Self::parse_i64(
                "ML_LABEL_HORIZON_HOURS",
                defaults.label_horizon_hours,
            )?,
            long_threshold: Self::parse_f64("ML_LONG_THRESHOLD", defaults.long_threshold)?,
            short_threshold: Self::parse_f64("ML_SHORT_THRESHOLD", defaults.short_threshold)?,
            ensemble_threshold: Self::parse_f64(
                "ML_ENSEMBLE_THRESHOLD",
                defaults.ensemble_threshold,
            )?,
            weights: EnsembleWeights {
                classic: Self::parse_f64("ML_WEIGHT_CLASSIC", defaults.weights.classic)?,
                logreg: Self::parse_f64("ML_WEIGHT_LOGREG", defaults.weights.logreg)?,
                xgboost: Self::parse_f64("ML_WEIGHT_XGBOOST", defaults.weights.xgboost)?,
            },
            anomaly_enabled: Self::parse_bool("ML_ANOMALY_ENABLED", defaults.anomaly_enabled),
            anomaly_threshold: Self::parse_f64("ML_ANOMALY_THRESHOLD", defaults.anomaly_threshold)?,
            anomaly_damp_max: Self::parse_f64("ML_ANOMALY_DAMP_MAX", defaults.anomaly_damp_max)?,
            isolation_forest: IsolationForestOptions {
                n_trees: Self::parse_usize("ML_IFOREST_TREES", defaults.isolation_forest.n_trees)?,
                sample_size: Self::parse_usize(
                    "ML_IFOREST_SAMPLE_SIZE",
                    defaults.isolation_forest.sample_size,
                )?,
                seed: Self::parse_u64("ML_IFOREST_SEED", defaults.isolation_forest.seed)?,
            },
            resolve_batch_size: Self::parse_usize(
                "ML_RESOLVE_BATCH_SIZE",
                defaults.resolve_batch_size,
            )?,
        };

        config.validated()
    }

    /// Reject inconsistent settings and normalise the recoverable ones
    pub fn validated(mut self) -> Result<Self> {
        if self.long_threshold <= self.short_threshold {
            anyhow::bail!(
                "ML_LONG_THRESHOLD ({}) must be greater than ML_SHORT_THRESHOLD ({})",
                self.long_threshold,
                self.short_threshold
            );
        }
        if self.intervals.is_empty() {
            anyhow::bail!("ML_INTERVALS must name at least one interval");
        }
        if !self.intervals.contains(&self.primary_interval) {
            warn!(
                "Primary interval {} missing from ML_INTERVALS, adding it",
                self.primary_interval
            );
            self.intervals.push(self.primary_interval);
        }
        if self.label_horizon_hours <= 0 {
            anyhow::bail!("ML_LABEL_HORIZON_HOURS must be positive");
        }
        if self.isolation_forest.n_trees == 0 || self.isolation_forest.sample_size < 2 {
            anyhow::bail!("ML_IFOREST_TREES must be > 0 and ML_IFOREST_SAMPLE_SIZE >= 2");
        }
        self.anomaly_damp_max = self.anomaly_damp_max.clamp(0.0, 1.0);
        self.resolve_batch_size = self.resolve_batch_size.max(1);
        Ok(self)
    }

    pub fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            primary_interval: self.primary_interval,
            intervals: self.intervals.clone(),
            train_window_days: self.train_window_days,
            min_train_samples: self.min_train_samples,
            anomaly_enabled: self.anomaly_enabled,
            isolation_forest: self.isolation_forest,
        }
    }

    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            intervals: self.intervals.clone(),
            primary_interval: self.primary_interval,
            label_horizon_hours: self.label_horizon_hours,
            long_threshold: self.long_threshold,
            short_threshold: self.short_threshold,
            ensemble_threshold: self.ensemble_threshold,
            weights: self.weights,
            anomaly_enabled: self.anomaly_enabled,
            anomaly_threshold: self.anomaly_threshold,
            anomaly_damp_max: self.anomaly_damp_max,
        }
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<f64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_i64(key: &str, default: i64) -> Result<i64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<i64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}
