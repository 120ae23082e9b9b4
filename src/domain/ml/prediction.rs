use crate::domain::market::timeframe::Timeframe;
use crate::domain::ml::signal::{Direction, RiskLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model output for one candle.
///
/// Uniquely keyed by (symbol, interval, open_time, model_key, model_version);
/// re-running inference over the same candle refreshes the row in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Option<i64>,
    pub symbol: String,
    pub interval: Timeframe,
    pub open_time: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub model_key: String,
    pub model_version: i64,
    pub prob_up: f64,
    pub confidence: f64,
    pub direction: Direction,
    pub risk: RiskLevel,
    pub signal_id: Option<i64>,
    pub details_json: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub actual_up: Option<bool>,
    pub is_correct: Option<bool>,
    pub realized_return: Option<f64>,
}

impl Prediction {
    /// True when `other` addresses the same logical row (the upsert key)
    pub fn same_key(&self, other: &Prediction) -> bool {
        self.symbol == other.symbol
            && self.interval == other.interval
            && self.open_time == other.open_time
            && self.model_key == other.model_key
            && self.model_version == other.model_version
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Outcome recorded once the target candle has closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResolution {
    pub resolved_at: DateTime<Utc>,
    pub actual_up: bool,
    pub is_correct: bool,
    pub realized_return: f64,
}

/// Read filter for upstream consumers. `None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct PredictionFilter {
    pub symbol: Option<String>,
    pub interval: Option<Timeframe>,
    pub model_key: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl PredictionFilter {
    pub fn matches(&self, p: &Prediction) -> bool {
        self.symbol.as_ref().is_none_or(|s| *s == p.symbol)
            && self.interval.is_none_or(|i| i == p.interval)
            && self.model_key.as_ref().is_none_or(|k| *k == p.model_key)
            && self.from.is_none_or(|f| p.open_time >= f)
            && self.to.is_none_or(|t| p.open_time <= t)
    }
}
