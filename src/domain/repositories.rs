//! Repository Pattern Abstractions
//!
//! This module defines the storage contracts the ML signal pipeline runs
//! against, keeping training/inference logic independent of the storage
//! engine.
//!
//! # Design
//!
//! - `ModelRegistry`: versioned, append-only model artifacts with a single
//!   active version per model key
//! - `FeatureStore`: read-only access to engineered feature rows
//! - `CandleRepository`: read-only access to OHLCV candles
//! - `SignalStore`: classic and ML trading signals
//! - `PredictionStore`: idempotent prediction persistence and resolution
//!
//! # Implementations
//!
//! SQLite implementations live in `infrastructure::persistence`, in-memory
//! ones (tests, dry runs) in `infrastructure::repositories`.

use crate::domain::market::{Candle, Timeframe};
use crate::domain::ml::{
    FeatureRow, ModelVersion, Prediction, PredictionFilter, PredictionResolution, Signal,
    SignalFilter,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Versioned store of trained model artifacts
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Allocate the next version number for `model_key`.
    /// Strictly increasing per key; concurrent callers on the same key serialize.
    async fn next_version(&self, model_key: &str) -> Result<i64>;

    /// Append a new version. Returns the stored row with its id assigned.
    async fn insert_model_version(&self, version: &ModelVersion) -> Result<ModelVersion>;

    /// The currently active version of `model_key`, if any
    async fn get_active_model(&self, model_key: &str) -> Result<Option<ModelVersion>>;

    /// Deactivate every other version of `model_key` and activate `version`,
    /// atomically. Fails with `MlError::ModelVersionNotFound` if the target
    /// version was never persisted.
    async fn activate_model(&self, model_key: &str, version: i64) -> Result<()>;

    async fn get_model_version(&self, model_key: &str, version: i64)
    -> Result<Option<ModelVersion>>;

    /// All versions of `model_key`, newest first
    async fn list_model_versions(&self, model_key: &str) -> Result<Vec<ModelVersion>>;
}

/// Engineered features produced by the external feature engine
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Rows in `[from, to]` whose label is known, ordered by open time
    async fn list_labeled_rows(
        &self,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>>;

    /// All rows in `[from, to]`, labeled or not, ordered by open time
    async fn list_rows(
        &self,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>>;

    /// The most recent row of every symbol for `interval`
    async fn list_latest_by_interval(&self, interval: Timeframe) -> Result<Vec<FeatureRow>>;
}

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Most recent `limit` candles, ordered by open time ascending
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Candles with `from <= open_time <= to`, ordered by open time ascending
    async fn get_candles_in_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert signals, refreshing risk/details of rows that already exist
    /// under the same (symbol, interval, indicator, timestamp, direction).
    /// Returns the signals with their assigned ids, in input order.
    async fn insert_signals(&self, signals: &[Signal]) -> Result<Vec<Signal>>;

    async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>>;
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Insert or refresh the row keyed by
    /// (symbol, interval, open_time, model_key, model_version).
    /// The returned prediction carries the stable row id.
    async fn upsert_prediction(&self, prediction: &Prediction) -> Result<Prediction>;

    async fn attach_signal_id(&self, prediction_id: i64, signal_id: i64) -> Result<()>;

    /// Unresolved predictions with `target_time <= now`, ordered by
    /// `(target_time, id)`. Anomaly-model rows never resolve and are left out.
    ///
    /// `after` is a keyset cursor: only rows strictly after that
    /// `(target_time, id)` are returned, so callers can page past rows they
    /// cannot resolve yet.
    async fn list_unresolved_predictions(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, i64)>,
        limit: usize,
    ) -> Result<Vec<Prediction>>;

    /// Record the outcome. Fails with `MlError::NoRowsAffected` when the row
    /// is missing or was already resolved.
    async fn resolve_prediction(
        &self,
        prediction_id: i64,
        resolution: &PredictionResolution,
    ) -> Result<()>;

    /// Read access for upstream consumers, newest first
    async fn list_predictions(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>>;
}
