use crate::domain::market::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const LOGREG_MODEL_KEY: &str = "logreg";
pub const XGBOOST_MODEL_KEY: &str = "xgboost";
pub const ENSEMBLE_MODEL_KEY: &str = "ensemble";
pub const ANOMALY_MODEL_KEY_PREFIX: &str = "iforest";

/// Registry key of the anomaly detector trained for `interval`, e.g. `iforest_1h`.
pub fn anomaly_model_key(interval: Timeframe) -> String {
    format!("{}_{}", ANOMALY_MODEL_KEY_PREFIX, interval)
}

pub fn is_anomaly_model_key(model_key: &str) -> bool {
    model_key.starts_with(ANOMALY_MODEL_KEY_PREFIX)
}

/// Encoding of `ModelVersion::artifact_blob`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Json,
    Binary,
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactFormat::Json => write!(f, "json"),
            ArtifactFormat::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for ArtifactFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ArtifactFormat::Json),
            "binary" | "bin" => Ok(ArtifactFormat::Binary),
            _ => anyhow::bail!("Invalid artifact format: {}", s),
        }
    }
}

/// Immutable record of one training run.
///
/// Rows are append-only; `is_active` is the only field that changes after
/// insert and it is only ever changed through `ModelRegistry::activate_model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: Option<i64>,
    pub model_key: String,
    pub version: i64,
    pub trained_from: DateTime<Utc>,
    pub trained_to: DateTime<Utc>,
    pub hyperparameters_json: String,
    pub metrics_json: String,
    pub artifact_format: ArtifactFormat,
    #[serde(skip)]
    pub artifact_blob: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ModelVersion {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model_key: impl Into<String>,
        version: i64,
        trained_from: DateTime<Utc>,
        trained_to: DateTime<Utc>,
        hyperparameters_json: String,
        metrics_json: String,
        artifact_format: ArtifactFormat,
        artifact_blob: Vec<u8>,
    ) -> Self {
        Self {
            id: None,
            model_key: model_key.into(),
            version,
            trained_from,
            trained_to,
            hyperparameters_json,
            metrics_json,
            artifact_format,
            artifact_blob,
            is_active: false, // Activation is a separate, transactional step
            created_at: Utc::now(),
        }
    }

    /// Reads a numeric metric out of `metrics_json`.
    ///
    /// `Ok(None)` when the metric is absent, `Err` when the JSON itself is
    /// malformed.
    pub fn metric(&self, name: &str) -> serde_json::Result<Option<f64>> {
        let value: serde_json::Value = serde_json::from_str(&self.metrics_json)?;
        Ok(value.get(name).and_then(|v| v.as_f64()))
    }
}
