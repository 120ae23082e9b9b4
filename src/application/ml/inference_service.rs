use super::ensemble::{
    EnsembleWeights, classic_score, combine_scores, confidence_from_prob, damp_factor,
    direction_from_prob, ensemble_direction, risk_from_anomaly, risk_from_confidence, round4,
};
use super::isolation_forest::IsolationForestModel;
use super::model::{DirectionalModel, ModelFamily};
use crate::application::system::CancellationToken;
use crate::domain::market::Timeframe;
use crate::domain::ml::model_version::{
    ENSEMBLE_MODEL_KEY, LOGREG_MODEL_KEY, XGBOOST_MODEL_KEY, anomaly_model_key,
};
use crate::domain::ml::signal::ml_indicator;
use crate::domain::ml::{Direction, FeatureRow, Prediction, RiskLevel, Signal, SignalFilter};
use crate::domain::repositories::{FeatureStore, ModelRegistry, PredictionStore, SignalStore};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub intervals: Vec<Timeframe>,
    pub primary_interval: Timeframe,
    pub label_horizon_hours: i64,
    pub long_threshold: f64,
    pub short_threshold: f64,
    pub ensemble_threshold: f64,
    pub weights: EnsembleWeights,
    pub anomaly_enabled: bool,
    pub anomaly_threshold: f64,
    pub anomaly_damp_max: f64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            intervals: vec![Timeframe::OneHour, Timeframe::FourHour],
            primary_interval: Timeframe::OneHour,
            label_horizon_hours: 4,
            long_threshold: 0.55,
            short_threshold: 0.45,
            ensemble_threshold: 0.2,
            weights: EnsembleWeights::default(),
            anomaly_enabled: true,
            anomaly_threshold: 0.6,
            anomaly_damp_max: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InferenceReport {
    pub rows_scored: usize,
    pub predictions_written: usize,
    pub anomaly_predictions: usize,
    pub signals_emitted: usize,
    pub predictions_by_model: BTreeMap<String, usize>,
    /// Models whose artifact could not be loaded this cycle
    pub skipped_models: Vec<String>,
}

impl InferenceReport {
    fn record_prediction(&mut self, model_key: &str) {
        self.predictions_written += 1;
        *self
            .predictions_by_model
            .entry(model_key.to_string())
            .or_default() += 1;
    }
}

struct LoadedModel {
    key: String,
    version: i64,
    model: Box<dyn DirectionalModel>,
}

struct LoadedDetector {
    version: i64,
    forest: IsolationForestModel,
}

/// Scores the latest feature rows with every active model and persists the
/// per-model, anomaly and ensemble predictions.
pub struct InferenceService {
    registry: Arc<dyn ModelRegistry>,
    features: Arc<dyn FeatureStore>,
    signals: Arc<dyn SignalStore>,
    predictions: Arc<dyn PredictionStore>,
    families: Vec<Arc<dyn ModelFamily>>,
    config: InferenceConfig,
}

impl InferenceService {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        features: Arc<dyn FeatureStore>,
        signals: Arc<dyn SignalStore>,
        predictions: Arc<dyn PredictionStore>,
        families: Vec<Arc<dyn ModelFamily>>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            registry,
            features,
            signals,
            predictions,
            families,
            config,
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<InferenceReport> {
        let mut report = InferenceReport::default();
        let directional = self.load_directional_models(&mut report).await?;

        for &interval in &self.config.intervals {
            cancel.check()?;
            let detector = if self.config.anomaly_enabled {
                self.load_detector(interval, &mut report).await?
            } else {
                None
            };

            let rows = self
                .features
                .list_latest_by_interval(interval)
                .await
                .with_context(|| format!("Failed to load latest feature rows for {}", interval))?;
            debug!("Scoring {} rows on {}", rows.len(), interval);

            for row in &rows {
                cancel.check()?;
                self.score_row(row, detector.as_ref(), &directional, &mut report)
                    .await?;
                report.rows_scored += 1;
            }
        }

        info!(
            "Inference finished: {} rows, {} predictions ({} anomaly), {} signals",
            report.rows_scored,
            report.predictions_written,
            report.anomaly_predictions,
            report.signals_emitted
        );
        Ok(report)
    }

    async fn load_directional_models(&self, report: &mut InferenceReport) -> Result<Vec<LoadedModel>> {
        let mut loaded = Vec::new();
        for family in &self.families {
            let Some(active) = self.registry.get_active_model(family.key()).await? else {
                debug!("No active {} model", family.key());
                continue;
            };
            match family.unmarshal_binary(&active.artifact_blob) {
                Ok(model) => loaded.push(LoadedModel {
                    key: active.model_key.clone(),
                    version: active.version,
                    model,
                }),
                Err(e) => {
                    warn!(
                        "Skipping {} v{} this cycle: {:#}",
                        active.model_key, active.version, e
                    );
                    report.skipped_models.push(active.model_key.clone());
                }
            }
        }
        Ok(loaded)
    }

    async fn load_detector(
        &self,
        interval: Timeframe,
        report: &mut InferenceReport,
    ) -> Result<Option<LoadedDetector>> {
        let key = anomaly_model_key(interval);
        let Some(active) = self.registry.get_active_model(&key).await? else {
            return Ok(None);
        };
        match IsolationForestModel::unmarshal_binary(&active.artifact_blob) {
            Ok(forest) => Ok(Some(LoadedDetector {
                version: active.version,
                forest,
            })),
            Err(e) => {
                warn!("Skipping {} v{} this cycle: {:#}", key, active.version, e);
                report.skipped_models.push(key);
                Ok(None)
            }
        }
    }

    async fn score_row(
        &self,
        row: &FeatureRow,
        detector: Option<&LoadedDetector>,
        directional: &[LoadedModel],
        report: &mut InferenceReport,
    ) -> Result<()> {
        let features = row.sanitized_features();
        let target_time = row.open_time + Duration::hours(self.config.label_horizon_hours);

        let mut anomaly: Option<(f64, f64)> = None;
        if let Some(detector) = detector {
            let score = detector.forest.score(&features).clamp(0.0, 1.0);
            let damp = damp_factor(score, self.config.anomaly_damp_max);
            anomaly = Some((score, damp));

            let key = anomaly_model_key(row.interval);
            let details = json!({
                "model_key": key,
                "model_version": detector.version,
                "anomaly_score": round4(score),
                "damp_factor": round4(damp),
            });
            let prediction = self.build_prediction(
                row,
                target_time,
                &key,
                detector.version,
                0.5,
                score,
                Direction::Hold,
                risk_from_anomaly(score),
                details,
            );
            self.predictions
                .upsert_prediction(&prediction)
                .await
                .context("Failed to persist anomaly prediction")?;
            report.record_prediction(&key);
            report.anomaly_predictions += 1;
        }

        if row.interval != self.config.primary_interval || directional.is_empty() {
            return Ok(());
        }

        let classic_signals = self
            .signals
            .list_signals(&SignalFilter::at(&row.symbol, row.interval, row.open_time))
            .await
            .context("Failed to load classic signals")?;
        let classic = classic_score(&classic_signals);

        let mut probs: BTreeMap<&str, f64> = BTreeMap::new();
        let mut max_version = 1;

        for loaded in directional {
            let prob = match loaded.model.predict_prob(&features) {
                Ok(p) if p.is_finite() => p.clamp(0.0, 1.0),
                Ok(p) => {
                    warn!("{} produced non-finite probability {} for {}", loaded.key, p, row.symbol);
                    continue;
                }
                Err(e) => {
                    warn!("{} failed on {}: {:#}", loaded.key, row.symbol, e);
                    continue;
                }
            };
            probs.insert(loaded.key.as_str(), prob);
            max_version = max_version.max(loaded.version);

            let confidence = confidence_from_prob(prob);
            let direction =
                direction_from_prob(prob, self.config.long_threshold, self.config.short_threshold);
            let mut details = json!({
                "model_key": loaded.key,
                "model_version": loaded.version,
                "prob_up": round4(prob),
                "confidence": round4(confidence),
            });
            add_anomaly_details(&mut details, anomaly);

            let prediction = self.build_prediction(
                row,
                target_time,
                &loaded.key,
                loaded.version,
                prob,
                confidence,
                direction,
                risk_from_confidence(confidence),
                details,
            );
            self.persist_with_signal(prediction, report).await?;
        }

        let damp = anomaly.map(|(_, d)| d).unwrap_or(1.0);
        let fused = combine_scores(
            &self.config.weights,
            classic,
            probs.get(LOGREG_MODEL_KEY).copied(),
            probs.get(XGBOOST_MODEL_KEY).copied(),
        );
        let score = (fused * damp).clamp(-1.0, 1.0);
        let prob = ((score + 1.0) / 2.0).clamp(0.0, 1.0);
        let confidence = score.abs().min(1.0);
        let direction = ensemble_direction(score, self.config.ensemble_threshold);

        let mut risk = risk_from_confidence(confidence);
        if anomaly.is_some_and(|(s, _)| s >= self.config.anomaly_threshold) {
            risk = risk.bump();
        }

        let mut details = json!({
            "model_key": ENSEMBLE_MODEL_KEY,
            "model_version": max_version,
            "prob_up": round4(prob),
            "confidence": round4(confidence),
            "ensemble_score": round4(score),
            "classic_score": round4(classic),
        });
        add_anomaly_details(&mut details, anomaly);

        let prediction = self.build_prediction(
            row,
            target_time,
            ENSEMBLE_MODEL_KEY,
            max_version,
            prob,
            confidence,
            direction,
            risk,
            details,
        );
        self.persist_with_signal(prediction, report).await
    }

    #[allow(clippy::too_many_arguments)]
    fn build_prediction(
        &self,
        row: &FeatureRow,
        target_time: DateTime<Utc>,
        model_key: &str,
        model_version: i64,
        prob_up: f64,
        confidence: f64,
        direction: Direction,
        risk: RiskLevel,
        details: serde_json::Value,
    ) -> Prediction {
        Prediction {
            id: None,
            symbol: row.symbol.clone(),
            interval: row.interval,
            open_time: row.open_time,
            target_time,
            model_key: model_key.to_string(),
            model_version,
            prob_up,
            confidence,
            direction,
            risk,
            signal_id: None,
            details_json: details.to_string(),
            resolved_at: None,
            actual_up: None,
            is_correct: None,
            realized_return: None,
        }
    }

    /// Upsert the prediction; directional ones also get a signal whose id is
    /// linked back onto the prediction row.
    async fn persist_with_signal(
        &self,
        prediction: Prediction,
        report: &mut InferenceReport,
    ) -> Result<()> {
        let stored = self
            .predictions
            .upsert_prediction(&prediction)
            .await
            .with_context(|| format!("Failed to persist {} prediction", prediction.model_key))?;
        report.record_prediction(&prediction.model_key);

        if !prediction.direction.is_directional() {
            return Ok(());
        }
        if stored.is_resolved() {
            debug!(
                "{} prediction for {} at {} already resolved; not re-signalling",
                prediction.model_key, prediction.symbol, prediction.open_time
            );
            return Ok(());
        }

        let prediction_id = stored
            .id
            .ok_or_else(|| anyhow!("Prediction store returned a row without id"))?;
        let signal = Signal::new(
            prediction.symbol.as_str(),
            prediction.interval,
            ml_indicator(&prediction.model_key),
            prediction.open_time,
            prediction.direction,
            prediction.risk,
            prediction.details_json.clone(),
        );
        let inserted = self
            .signals
            .insert_signals(std::slice::from_ref(&signal))
            .await
            .context("Failed to insert ML signal")?;

        if let Some(signal_id) = inserted.first().and_then(|s| s.id) {
            self.predictions
                .attach_signal_id(prediction_id, signal_id)
                .await
                .context("Failed to link signal to prediction")?;
            report.signals_emitted += 1;
        }
        Ok(())
    }
}

fn add_anomaly_details(details: &mut serde_json::Value, anomaly: Option<(f64, f64)>) {
    if let (Some((score, damp)), Some(map)) = (anomaly, details.as_object_mut()) {
        map.insert("anomaly_score".to_string(), json!(round4(score)));
        map.insert("damp_factor".to_string(), json!(round4(damp)));
    }
}
