//! In-Memory Repository Implementations
//!
//! Thread-safe implementations of the storage traits in
//! `domain::repositories`, mirroring the SQLite semantics (unique keys,
//! single active model version, conditional resolution).
//!
//! Used by unit/integration tests and by dry runs that must not touch the
//! shared database. Data is lost when the process exits.

use crate::domain::errors::MlError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::ml::model_version::is_anomaly_model_key;
use crate::domain::ml::{
    FeatureRow, ModelVersion, Prediction, PredictionFilter, PredictionResolution, Signal,
    SignalFilter,
};
use crate::domain::repositories::{
    CandleRepository, FeatureStore, ModelRegistry, PredictionStore, SignalStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct RegistryState {
    versions: Vec<ModelVersion>,
    counters: HashMap<String, i64>,
    next_id: i64,
}

/// In-memory implementation of ModelRegistry
#[derive(Default)]
pub struct InMemoryModelRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn next_version(&self, model_key: &str) -> Result<i64> {
        let mut state = self.state.write().await;
        let persisted_max = state
            .versions
            .iter()
            .filter(|v| v.model_key == model_key)
            .map(|v| v.version)
            .max()
            .unwrap_or(0);
        let counter = state.counters.entry(model_key.to_string()).or_insert(0);
        *counter = (*counter).max(persisted_max) + 1;
        Ok(*counter)
    }

    async fn insert_model_version(&self, version: &ModelVersion) -> Result<ModelVersion> {
        let mut state = self.state.write().await;
        if state
            .versions
            .iter()
            .any(|v| v.model_key == version.model_key && v.version == version.version)
        {
            anyhow::bail!(
                "Model version {} v{} already exists",
                version.model_key,
                version.version
            );
        }
        state.next_id += 1;
        let mut stored = version.clone();
        stored.id = Some(state.next_id);
        stored.is_active = false;
        state.versions.push(stored.clone());
        Ok(stored)
    }

    async fn get_active_model(&self, model_key: &str) -> Result<Option<ModelVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .iter()
            .find(|v| v.model_key == model_key && v.is_active)
            .cloned())
    }

    async fn activate_model(&self, model_key: &str, version: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if !state
            .versions
            .iter()
            .any(|v| v.model_key == model_key && v.version == version)
        {
            return Err(MlError::ModelVersionNotFound {
                model_key: model_key.to_string(),
                version,
            }
            .into());
        }
        for v in state.versions.iter_mut().filter(|v| v.model_key == model_key) {
            v.is_active = v.version == version;
        }
        Ok(())
    }

    async fn get_model_version(
        &self,
        model_key: &str,
        version: i64,
    ) -> Result<Option<ModelVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .iter()
            .find(|v| v.model_key == model_key && v.version == version)
            .cloned())
    }

    async fn list_model_versions(&self, model_key: &str) -> Result<Vec<ModelVersion>> {
        let state = self.state.read().await;
        let mut versions: Vec<ModelVersion> = state
            .versions
            .iter()
            .filter(|v| v.model_key == model_key)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }
}

type FeatureKey = (String, Timeframe, DateTime<Utc>);

/// In-memory implementation of FeatureStore
#[derive(Default)]
pub struct InMemoryFeatureStore {
    rows: Arc<RwLock<BTreeMap<FeatureKey, FeatureRow>>>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_rows(&self, rows: &[FeatureRow]) -> Result<usize> {
        let mut store = self.rows.write().await;
        for row in rows {
            store.insert(
                (row.symbol.clone(), row.interval, row.open_time),
                row.clone(),
            );
        }
        Ok(rows.len())
    }

    async fn collect(
        &self,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        labeled_only: bool,
    ) -> Vec<FeatureRow> {
        let store = self.rows.read().await;
        let mut rows: Vec<FeatureRow> = store
            .values()
            .filter(|r| r.interval == interval && r.open_time >= from && r.open_time <= to)
            .filter(|r| !labeled_only || r.is_labeled())
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.open_time
                .cmp(&b.open_time)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        rows
    }
}

#[async_trait]
impl FeatureStore for InMemoryFeatureStore {
    async fn list_labeled_rows(
        &self,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>> {
        Ok(self.collect(interval, from, to, true).await)
    }

    async fn list_rows(
        &self,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>> {
        Ok(self.collect(interval, from, to, false).await)
    }

    async fn list_latest_by_interval(&self, interval: Timeframe) -> Result<Vec<FeatureRow>> {
        let store = self.rows.read().await;
        let mut latest: BTreeMap<&str, &FeatureRow> = BTreeMap::new();
        for row in store.values().filter(|r| r.interval == interval) {
            let entry = latest.entry(row.symbol.as_str()).or_insert(row);
            if row.open_time > entry.open_time {
                *entry = row;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }
}

/// In-memory implementation of CandleRepository
#[derive(Default)]
pub struct InMemoryCandleRepository {
    candles: Arc<RwLock<Vec<Candle>>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save_candles(&self, candles: &[Candle]) {
        let mut store = self.candles.write().await;
        for candle in candles {
            store.retain(|c| {
                !(c.symbol == candle.symbol
                    && c.interval == candle.interval
                    && c.open_time == candle.open_time)
            });
            store.push(candle.clone());
        }
        store.sort_by_key(|c| c.open_time);
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let store = self.candles.read().await;
        let matching: Vec<Candle> = store
            .iter()
            .filter(|c| c.symbol == symbol && c.interval == interval)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).collect())
    }

    async fn get_candles_in_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let store = self.candles.read().await;
        Ok(store
            .iter()
            .filter(|c| {
                c.symbol == symbol
                    && c.interval == interval
                    && c.open_time >= from
                    && c.open_time <= to
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct SignalState {
    signals: Vec<Signal>,
    next_id: i64,
}

/// In-memory implementation of SignalStore
#[derive(Default)]
pub struct InMemorySignalStore {
    state: Arc<RwLock<SignalState>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn insert_signals(&self, signals: &[Signal]) -> Result<Vec<Signal>> {
        let mut state = self.state.write().await;
        let mut stored = Vec::with_capacity(signals.len());

        for signal in signals {
            let existing = state.signals.iter_mut().find(|s| {
                s.symbol == signal.symbol
                    && s.interval == signal.interval
                    && s.indicator == signal.indicator
                    && s.timestamp == signal.timestamp
                    && s.direction == signal.direction
            });
            match existing {
                Some(s) => {
                    s.risk = signal.risk;
                    s.details = signal.details.clone();
                    stored.push(s.clone());
                }
                None => {
                    state.next_id += 1;
                    let mut saved = signal.clone();
                    saved.id = Some(state.next_id);
                    state.signals.push(saved.clone());
                    stored.push(saved);
                }
            }
        }
        Ok(stored)
    }

    async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>> {
        let state = self.state.read().await;
        let mut out: Vec<Signal> = state
            .signals
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.timestamp, s.id));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[derive(Default)]
struct PredictionState {
    predictions: Vec<Prediction>,
    next_id: i64,
}

/// In-memory implementation of PredictionStore
#[derive(Default)]
pub struct InMemoryPredictionStore {
    state: Arc<RwLock<PredictionState>>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored prediction, in insertion order
    pub async fn all(&self) -> Vec<Prediction> {
        self.state.read().await.predictions.clone()
    }
}

#[async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn upsert_prediction(&self, prediction: &Prediction) -> Result<Prediction> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .predictions
            .iter_mut()
            .find(|p| p.same_key(prediction))
        {
            if existing.is_resolved() {
                return Ok(existing.clone());
            }
            existing.target_time = prediction.target_time;
            existing.prob_up = prediction.prob_up;
            existing.confidence = prediction.confidence;
            existing.direction = prediction.direction;
            existing.risk = prediction.risk;
            existing.details_json = prediction.details_json.clone();
            existing.signal_id = None;
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let mut stored = prediction.clone();
        stored.id = Some(state.next_id);
        stored.signal_id = None;
        stored.resolved_at = None;
        stored.actual_up = None;
        stored.is_correct = None;
        stored.realized_return = None;
        state.predictions.push(stored.clone());
        Ok(stored)
    }

    async fn attach_signal_id(&self, prediction_id: i64, signal_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let prediction = state
            .predictions
            .iter_mut()
            .find(|p| p.id == Some(prediction_id))
            .ok_or(MlError::NoRowsAffected {
                entity: "prediction",
                id: prediction_id,
            })?;
        prediction.signal_id = Some(signal_id);
        Ok(())
    }

    async fn list_unresolved_predictions(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, i64)>,
        limit: usize,
    ) -> Result<Vec<Prediction>> {
        let state = self.state.read().await;
        let mut due: Vec<Prediction> = state
            .predictions
            .iter()
            .filter(|p| {
                !p.is_resolved() && p.target_time <= now && !is_anomaly_model_key(&p.model_key)
            })
            .filter(|p| match (after, p.id) {
                (Some(cursor), Some(id)) => (p.target_time, id) > cursor,
                _ => true,
            })
            .cloned()
            .collect();
        due.sort_by_key(|p| (p.target_time, p.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn resolve_prediction(
        &self,
        prediction_id: i64,
        resolution: &PredictionResolution,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let prediction = state
            .predictions
            .iter_mut()
            .find(|p| p.id == Some(prediction_id) && !p.is_resolved())
            .ok_or(MlError::NoRowsAffected {
                entity: "prediction",
                id: prediction_id,
            })?;

        prediction.resolved_at = Some(resolution.resolved_at);
        prediction.actual_up = Some(resolution.actual_up);
        prediction.is_correct = Some(resolution.is_correct);
        prediction.realized_return = Some(resolution.realized_return);
        Ok(())
    }

    async fn list_predictions(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>> {
        let state = self.state.read().await;
        let mut out: Vec<Prediction> = state
            .predictions
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.open_time.cmp(&a.open_time).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::is_no_rows_affected;
    use crate::domain::ml::{ArtifactFormat, Direction, RiskLevel};
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_704_067_200, 0).unwrap()
    }

    fn model_version(key: &str, version: i64) -> ModelVersion {
        ModelVersion::new(
            key,
            version,
            base_time(),
            base_time(),
            "{}".to_string(),
            "{}".to_string(),
            ArtifactFormat::Json,
            vec![1, 2, 3],
        )
    }

    fn prediction(model_key: &str, open_time: DateTime<Utc>) -> Prediction {
        Prediction {
            id: None,
            symbol: "BTCUSDT".to_string(),
            interval: Timeframe::OneHour,
            open_time,
            target_time: open_time + Duration::hours(4),
            model_key: model_key.to_string(),
            model_version: 1,
            prob_up: 0.7,
            confidence: 0.4,
            direction: Direction::Long,
            risk: RiskLevel::clamped(4),
            signal_id: None,
            details_json: "{}".to_string(),
            resolved_at: None,
            actual_up: None,
            is_correct: None,
            realized_return: None,
        }
    }

    #[tokio::test]
    async fn test_registry_single_active_version() {
        let registry = InMemoryModelRegistry::new();
        for _ in 0..3 {
            let v = registry.next_version("logreg").await.unwrap();
            registry
                .insert_model_version(&model_version("logreg", v))
                .await
                .unwrap();
        }

        registry.activate_model("logreg", 1).await.unwrap();
        registry.activate_model("logreg", 3).await.unwrap();

        let versions = registry.list_model_versions("logreg").await.unwrap();
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
        assert_eq!(versions[0].version, 3);
        assert_eq!(
            registry.get_active_model("logreg").await.unwrap().unwrap().version,
            3
        );
    }

    #[tokio::test]
    async fn test_registry_activate_unknown_version_keeps_current() {
        let registry = InMemoryModelRegistry::new();
        registry
            .insert_model_version(&model_version("xgboost", 1))
            .await
            .unwrap();
        registry.activate_model("xgboost", 1).await.unwrap();

        let err = registry.activate_model("xgboost", 9).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MlError>(),
            Some(MlError::ModelVersionNotFound { .. })
        ));
        assert_eq!(
            registry.get_active_model("xgboost").await.unwrap().unwrap().version,
            1
        );
    }

    #[tokio::test]
    async fn test_prediction_upsert_is_idempotent() {
        let store = InMemoryPredictionStore::new();
        let first = store
            .upsert_prediction(&prediction("logreg", base_time()))
            .await
            .unwrap();
        store.attach_signal_id(first.id.unwrap(), 42).await.unwrap();

        let mut refreshed = prediction("logreg", base_time());
        refreshed.prob_up = 0.8;
        refreshed.confidence = 0.6;
        refreshed.details_json = r#"{"p_logreg":0.8}"#.to_string();
        let second = store.upsert_prediction(&refreshed).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.prob_up, 0.8);
        assert_eq!(second.confidence, 0.6);
        assert_eq!(second.details_json, r#"{"p_logreg":0.8}"#);
        assert_eq!(second.signal_id, None);

        let all = store.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].confidence, 0.6);
        assert_eq!(all[0].details_json, r#"{"p_logreg":0.8}"#);
    }

    #[tokio::test]
    async fn test_upsert_leaves_resolved_prediction_untouched() {
        let store = InMemoryPredictionStore::new();
        let stored = store
            .upsert_prediction(&prediction("logreg", base_time()))
            .await
            .unwrap();
        store.attach_signal_id(stored.id.unwrap(), 7).await.unwrap();
        let resolution = PredictionResolution {
            resolved_at: base_time() + Duration::hours(5),
            actual_up: true,
            is_correct: true,
            realized_return: 0.02,
        };
        store
            .resolve_prediction(stored.id.unwrap(), &resolution)
            .await
            .unwrap();

        let mut flipped = prediction("logreg", base_time());
        flipped.prob_up = 0.2;
        flipped.direction = Direction::Short;
        let after = store.upsert_prediction(&flipped).await.unwrap();

        assert_eq!(after.id, stored.id);
        assert_eq!(after.prob_up, 0.7);
        assert_eq!(after.direction, Direction::Long);
        assert_eq!(after.is_correct, Some(true));
        assert_eq!(after.signal_id, Some(7));
    }

    #[tokio::test]
    async fn test_resolve_twice_reports_no_rows() {
        let store = InMemoryPredictionStore::new();
        let stored = store
            .upsert_prediction(&prediction("logreg", base_time()))
            .await
            .unwrap();
        let resolution = PredictionResolution {
            resolved_at: base_time() + Duration::hours(5),
            actual_up: true,
            is_correct: true,
            realized_return: 0.02,
        };

        store
            .resolve_prediction(stored.id.unwrap(), &resolution)
            .await
            .unwrap();
        let err = store
            .resolve_prediction(stored.id.unwrap(), &resolution)
            .await
            .unwrap_err();
        assert!(is_no_rows_affected(&err));
    }

    #[tokio::test]
    async fn test_unresolved_listing_skips_anomaly_rows() {
        let store = InMemoryPredictionStore::new();
        store
            .upsert_prediction(&prediction("iforest_1h", base_time()))
            .await
            .unwrap();
        store
            .upsert_prediction(&prediction("logreg", base_time()))
            .await
            .unwrap();

        let due = store
            .list_unresolved_predictions(base_time() + Duration::hours(4), None, 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].model_key, "logreg");

        let early = store
            .list_unresolved_predictions(base_time() + Duration::hours(3), None, 10)
            .await
            .unwrap();
        assert!(early.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_listing_pages_by_cursor() {
        let store = InMemoryPredictionStore::new();
        for hour in 0..3 {
            store
                .upsert_prediction(&prediction("logreg", base_time() + Duration::hours(hour)))
                .await
                .unwrap();
        }
        let now = base_time() + Duration::hours(10);

        let first = store.list_unresolved_predictions(now, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let last = &first[1];
        let cursor = (last.target_time, last.id.unwrap());

        let rest = store
            .list_unresolved_predictions(now, Some(cursor), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].open_time, base_time() + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_latest_row_per_symbol() {
        let store = InMemoryFeatureStore::new();
        let t0 = base_time();
        store
            .upsert_rows(&[
                FeatureRow::new("BTCUSDT", Timeframe::OneHour, t0, vec![1.0]),
                FeatureRow::new("BTCUSDT", Timeframe::OneHour, t0 + Duration::hours(1), vec![2.0]),
                FeatureRow::new("ETHUSDT", Timeframe::OneHour, t0, vec![3.0]),
                FeatureRow::new("ETHUSDT", Timeframe::FourHour, t0 + Duration::hours(4), vec![4.0]),
            ])
            .await
            .unwrap();

        let latest = store
            .list_latest_by_interval(Timeframe::OneHour)
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].symbol, "BTCUSDT");
        assert_eq!(latest[0].features, vec![2.0]);
        assert_eq!(latest[1].features, vec![3.0]);
    }
}
