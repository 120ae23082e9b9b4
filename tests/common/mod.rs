#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use mlsignal::application::ml::{IsolationForestOptions, TrainingConfig};
use mlsignal::domain::market::{Candle, Timeframe};
use mlsignal::domain::ml::feature_registry::{FEATURE_COUNT, FeatureRow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

pub const SYMBOL: &str = "BTCUSDT";

/// 2024-01-01T00:00:00Z
pub fn base_time() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0).unwrap()
}

pub fn hours(n: i64) -> DateTime<Utc> {
    base_time() + Duration::hours(n)
}

/// Hourly rows whose label is the sign of the first feature
pub fn separable_rows(symbol: &str, count: usize, seed: u64) -> Vec<FeatureRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let features: Vec<f64> = (0..FEATURE_COUNT)
                .map(|_| rng.random_range(-1.0..1.0))
                .collect();
            let label = features[0] > 0.0;
            FeatureRow::new(symbol, Timeframe::OneHour, hours(i as i64), features).with_label(label)
        })
        .collect()
}

/// Unlabeled row with a strongly bullish first feature
pub fn bullish_row(symbol: &str, at: DateTime<Utc>) -> FeatureRow {
    let mut features = vec![0.0; FEATURE_COUNT];
    features[0] = 0.95;
    FeatureRow::new(symbol, Timeframe::OneHour, at, features)
}

pub fn small_training_config() -> TrainingConfig {
    TrainingConfig {
        primary_interval: Timeframe::OneHour,
        intervals: vec![Timeframe::OneHour],
        train_window_days: 180,
        min_train_samples: 100,
        anomaly_enabled: true,
        isolation_forest: IsolationForestOptions {
            n_trees: 25,
            sample_size: 64,
            seed: 7,
        },
    }
}

pub fn candle(symbol: &str, open_time: DateTime<Utc>, close: Decimal) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        interval: Timeframe::OneHour,
        open_time,
        open: close,
        high: close,
        low: close,
        close,
        volume: Decimal::ONE,
    }
}
