use crate::domain::market::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered list of feature names.
/// This order MUST match the column order written by the feature engine.
/// Any change here is a breaking change for every persisted model artifact.
pub const FEATURE_NAMES: &[&str] = &[
    "ret_1",
    "ret_3",
    "ret_6",
    "ret_12",
    "vol_6",
    "vol_24",
    "volume_z",
    "rsi_14",
    "macd",
    "macd_signal",
    "macd_hist",
    "bb_position",
    "bb_width",
];

pub const FEATURE_COUNT: usize = 13;

pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// One row of engineered features for a single candle.
///
/// `label` is only set once the labelling horizon after `open_time` has
/// closed: `Some(true)` when the price went up over the horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub symbol: String,
    pub interval: Timeframe,
    pub open_time: DateTime<Utc>,
    pub features: Vec<f64>,
    pub label: Option<bool>,
}

impl FeatureRow {
    pub fn new(
        symbol: impl Into<String>,
        interval: Timeframe,
        open_time: DateTime<Utc>,
        features: Vec<f64>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            open_time,
            features,
            label: None,
        }
    }

    pub fn with_label(mut self, label: bool) -> Self {
        self.label = Some(label);
        self
    }

    pub fn is_labeled(&self) -> bool {
        self.label.is_some()
    }

    /// Feature vector with non-finite values replaced by 0 so a single bad
    /// indicator cannot poison a whole batch.
    pub fn sanitized_features(&self) -> Vec<f64> {
        self.features
            .iter()
            .map(|v| if v.is_finite() { *v } else { 0.0 })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_feature_vector_length() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
        assert_eq!(feature_names()[7], "rsi_14");
    }

    #[test]
    fn test_sanitized_features() {
        let ts = Utc.timestamp_opt(1_704_067_200, 0).unwrap();
        let row = FeatureRow::new("BTCUSDT", Timeframe::OneHour, ts, vec![1.0, f64::NAN, f64::INFINITY]);
        assert_eq!(row.sanitized_features(), vec![1.0, 0.0, 0.0]);
        assert!(!row.is_labeled());
        assert!(row.with_label(true).is_labeled());
    }
}
