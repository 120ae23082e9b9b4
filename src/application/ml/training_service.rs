use super::dataset::{LabeledDataset, unlabeled_matrix};
use super::isolation_forest::{IsolationForestModel, IsolationForestOptions};
use super::metrics::{compute_anomaly_score_metrics, compute_classification_metrics};
use super::model::ModelFamily;
use crate::application::system::CancellationToken;
use crate::domain::errors::MlError;
use crate::domain::market::Timeframe;
use crate::domain::ml::feature_registry::feature_names;
use crate::domain::ml::model_version::anomaly_model_key;
use crate::domain::ml::{ArtifactFormat, ModelVersion};
use crate::domain::repositories::{FeatureStore, ModelRegistry};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Candidates evaluated on fewer test rows never replace an active model
pub const MIN_PROMOTION_TEST_COUNT: usize = 300;
pub const MIN_AUC_IMPROVEMENT: f64 = 0.01;
pub const MIN_SCORE_STD_IMPROVEMENT: f64 = 0.01;
pub const MIN_ANOMALY_TRAIN_SAMPLES: usize = 300;

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub primary_interval: Timeframe,
    pub intervals: Vec<Timeframe>,
    pub train_window_days: i64,
    pub min_train_samples: usize,
    pub anomaly_enabled: bool,
    pub isolation_forest: IsolationForestOptions,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            primary_interval: Timeframe::OneHour,
            intervals: vec![Timeframe::OneHour, Timeframe::FourHour],
            train_window_days: 180,
            min_train_samples: 500,
            anomaly_enabled: true,
            isolation_forest: IsolationForestOptions::default(),
        }
    }
}

impl TrainingConfig {
    pub fn min_anomaly_samples(&self) -> usize {
        (self.min_train_samples / 2).max(MIN_ANOMALY_TRAIN_SAMPLES)
    }
}

/// One persisted training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingResult {
    pub model_key: String,
    pub interval: Timeframe,
    pub version: i64,
    pub metrics: serde_json::Value,
    pub promoted: bool,
    /// Soft failure of the promotion decision; the artifact stays persisted
    pub promotion_error: Option<String>,
}

/// A sub-run (one family or one interval) that produced no model
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRun {
    pub model_key: String,
    pub interval: Timeframe,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    pub results: Vec<TrainingResult>,
    pub skipped: Vec<SkippedRun>,
}

impl TrainingReport {
    pub fn trained(&self) -> usize {
        self.results.len()
    }

    pub fn promoted(&self) -> usize {
        self.results.iter().filter(|r| r.promoted).count()
    }
}

/// Directional promotion gate.
///
/// Promote when nothing is active. If the candidate already is the active
/// version its current flag is returned unchanged. Otherwise the candidate
/// needs at least `MIN_PROMOTION_TEST_COUNT` test rows and an AUC at least
/// `MIN_AUC_IMPROVEMENT` above the active one; an active model without an
/// `auc` metric is always beaten.
pub fn should_promote_directional(
    active: Option<&ModelVersion>,
    candidate_version: i64,
    candidate_auc: f64,
    candidate_test_count: usize,
) -> Result<bool> {
    let Some(active) = active else {
        return Ok(true);
    };
    if active.version == candidate_version {
        return Ok(active.is_active);
    }
    if candidate_test_count < MIN_PROMOTION_TEST_COUNT {
        return Ok(false);
    }
    let active_auc = active.metric("auc").with_context(|| {
        format!(
            "Malformed metrics on active {} v{}",
            active.model_key, active.version
        )
    })?;
    Ok(match active_auc {
        Some(auc) => candidate_auc >= auc + MIN_AUC_IMPROVEMENT,
        None => true,
    })
}

/// Anomaly promotion gate: a wider training score spread wins
pub fn should_promote_anomaly(
    active: Option<&ModelVersion>,
    candidate_version: i64,
    candidate_std: f64,
) -> Result<bool> {
    let Some(active) = active else {
        return Ok(true);
    };
    if active.version == candidate_version {
        return Ok(active.is_active);
    }
    let active_std = active.metric("score_std").with_context(|| {
        format!(
            "Malformed metrics on active {} v{}",
            active.model_key, active.version
        )
    })?;
    Ok(match active_std {
        Some(std) => candidate_std >= std + MIN_SCORE_STD_IMPROVEMENT,
        None => true,
    })
}

enum PromotionRule {
    Directional { auc: f64, test_count: usize },
    Anomaly { score_std: f64 },
}

/// Artifact of a finished training sub-run, ready for the registry
struct Candidate {
    model_key: String,
    interval: Timeframe,
    trained_from: DateTime<Utc>,
    trained_to: DateTime<Utc>,
    hyperparameters: serde_json::Value,
    metrics: serde_json::Value,
    artifact_format: ArtifactFormat,
    artifact: Vec<u8>,
    rule: PromotionRule,
}

/// Trains directional families and per-interval anomaly detectors, persists
/// every run as a new model version, and promotes versions that beat the
/// active one.
pub struct TrainingService {
    registry: Arc<dyn ModelRegistry>,
    features: Arc<dyn FeatureStore>,
    families: Vec<Arc<dyn ModelFamily>>,
    config: TrainingConfig,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TrainingService {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        features: Arc<dyn FeatureStore>,
        families: Vec<Arc<dyn ModelFamily>>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            registry,
            features,
            families,
            config,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Full training pass: directional families, then anomaly detectors.
    ///
    /// Dataset and training failures are recorded as skipped sub-runs;
    /// storage errors and cancellation abort the pass.
    pub async fn run(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<TrainingReport> {
        let mut report = TrainingReport::default();
        self.train_directional(now, cancel, &mut report).await?;
        if self.config.anomaly_enabled {
            self.train_anomaly(now, cancel, &mut report).await?;
        }
        info!(
            "Training pass finished: {} trained, {} promoted, {} skipped",
            report.trained(),
            report.promoted(),
            report.skipped.len()
        );
        Ok(report)
    }

    pub async fn train_directional(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut TrainingReport,
    ) -> Result<()> {
        let interval = self.config.primary_interval;
        if self.families.is_empty() {
            return Ok(());
        }
        cancel.check()?;

        let from = now - Duration::days(self.config.train_window_days);
        let rows = self
            .features
            .list_labeled_rows(interval, from, now)
            .await
            .context("Failed to load labeled feature rows")?;
        let dataset = LabeledDataset::from_rows(&rows);

        // a split needs at least one train and one test row
        let need = self.config.min_train_samples.max(2);
        if dataset.len() < need {
            let err = MlError::InsufficientSamples {
                context: format!("directional training on {}", interval),
                have: dataset.len(),
                need,
            };
            warn!("{}", err);
            for family in &self.families {
                report.skipped.push(SkippedRun {
                    model_key: family.key().to_string(),
                    interval,
                    reason: err.to_string(),
                });
            }
            return Ok(());
        }

        let split = Arc::new(dataset.split()?);
        let (trained_from, trained_to) = dataset
            .time_range()
            .ok_or_else(|| anyhow!("labeled dataset has no time range"))?;
        let names = feature_names();
        info!(
            "Directional dataset on {}: {} train / {} validation / {} test",
            interval,
            split.bounds.train_len(),
            split.bounds.validation_len(),
            split.bounds.test_len()
        );

        for family in &self.families {
            cancel.check()?;
            let key = family.key().to_string();

            let fit_family = Arc::clone(family);
            let fit_split = Arc::clone(&split);
            let fit_names = names.clone();
            let fitted = tokio::task::spawn_blocking(move || -> Result<_> {
                let model = fit_family.train(&fit_split.train_x, &fit_split.train_y, &fit_names)?;
                let probs = model.predict_batch(&fit_split.test_x)?;
                let artifact = model.marshal_binary()?;
                Ok((model.hyperparameters(), probs, artifact))
            })
            .await
            .context("Training task panicked")?;

            let (hyperparameters, probs, artifact) = match fitted {
                Ok(fitted) => fitted,
                Err(e) => {
                    warn!("Training {} failed: {:#}", key, e);
                    report.skipped.push(SkippedRun {
                        model_key: key,
                        interval,
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };

            let probs: Vec<f64> = probs.iter().map(|p| p.clamp(0.0, 1.0)).collect();
            let mut metrics = compute_classification_metrics(&probs, &split.test_y);
            metrics.train_count = split.bounds.train_len();
            metrics.validation_count = split.bounds.validation_len();
            info!(
                "{} trained: auc={:.4} accuracy={:.4} brier={:.4} test_count={}",
                key, metrics.auc, metrics.accuracy, metrics.brier, metrics.test_count
            );

            let candidate = Candidate {
                model_key: key,
                interval,
                trained_from,
                trained_to,
                hyperparameters,
                metrics: serde_json::to_value(&metrics)?,
                artifact_format: family.artifact_format(),
                artifact,
                rule: PromotionRule::Directional {
                    auc: metrics.auc,
                    test_count: metrics.test_count,
                },
            };
            report.results.push(self.persist_and_promote(candidate).await?);
        }
        Ok(())
    }

    pub async fn train_anomaly(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut TrainingReport,
    ) -> Result<()> {
        let from = now - Duration::days(self.config.train_window_days);
        let need = self.config.min_anomaly_samples();

        for &interval in &self.config.intervals {
            cancel.check()?;
            let key = anomaly_model_key(interval);

            let rows = self
                .features
                .list_rows(interval, from, now)
                .await
                .with_context(|| format!("Failed to load feature rows for {}", interval))?;
            if rows.len() < need {
                let err = MlError::InsufficientSamples {
                    context: format!("anomaly training on {}", interval),
                    have: rows.len(),
                    need,
                };
                warn!("{}", err);
                report.skipped.push(SkippedRun {
                    model_key: key,
                    interval,
                    reason: err.to_string(),
                });
                continue;
            }

            let trained_from = rows.iter().map(|r| r.open_time).min().unwrap_or(from);
            let trained_to = rows.iter().map(|r| r.open_time).max().unwrap_or(now);
            let matrix = unlabeled_matrix(&rows);
            let options = self.config.isolation_forest;
            let fit_key = key.clone();

            let fitted = tokio::task::spawn_blocking(move || -> Result<_> {
                let model = IsolationForestModel::train(
                    &fit_key,
                    interval,
                    &matrix,
                    &feature_names(),
                    options,
                    trained_from,
                    trained_to,
                )?;
                let scores = model.score_batch(&matrix);
                let artifact = model.marshal_binary()?;
                Ok((model.hyperparameters(), scores, artifact))
            })
            .await
            .context("Training task panicked")?;

            let (hyperparameters, scores, artifact) = match fitted {
                Ok(fitted) => fitted,
                Err(e) => {
                    warn!("Training {} failed: {:#}", key, e);
                    report.skipped.push(SkippedRun {
                        model_key: key,
                        interval,
                        reason: format!("{:#}", e),
                    });
                    continue;
                }
            };

            let metrics = compute_anomaly_score_metrics(&scores);
            info!(
                "{} trained: score_mean={:.4} score_std={:.4} score_p95={:.4} rows={}",
                key, metrics.score_mean, metrics.score_std, metrics.score_p95, metrics.train_count
            );

            let candidate = Candidate {
                model_key: key,
                interval,
                trained_from,
                trained_to,
                hyperparameters,
                metrics: serde_json::to_value(&metrics)?,
                artifact_format: ArtifactFormat::Json,
                artifact,
                rule: PromotionRule::Anomaly {
                    score_std: metrics.score_std,
                },
            };
            report.results.push(self.persist_and_promote(candidate).await?);
        }
        Ok(())
    }

    async fn key_lock(&self, model_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        Arc::clone(
            locks
                .entry(model_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Version allocation, insert and activation for one key run under that
    /// key's lock; registry errors propagate.
    async fn persist_and_promote(&self, candidate: Candidate) -> Result<TrainingResult> {
        let lock = self.key_lock(&candidate.model_key).await;
        let _guard = lock.lock().await;

        let key = candidate.model_key.as_str();
        let version = self.registry.next_version(key).await?;
        let record = ModelVersion::new(
            key,
            version,
            candidate.trained_from,
            candidate.trained_to,
            candidate.hyperparameters.to_string(),
            candidate.metrics.to_string(),
            candidate.artifact_format,
            candidate.artifact,
        );
        let stored = self.registry.insert_model_version(&record).await?;
        let active = self.registry.get_active_model(key).await?;

        let decision = match candidate.rule {
            PromotionRule::Directional { auc, test_count } => {
                should_promote_directional(active.as_ref(), stored.version, auc, test_count)
            }
            PromotionRule::Anomaly { score_std } => {
                should_promote_anomaly(active.as_ref(), stored.version, score_std)
            }
        };

        let (promoted, promotion_error) = match decision {
            Ok(true) => {
                let already_active = active
                    .as_ref()
                    .is_some_and(|a| a.version == stored.version && a.is_active);
                if !already_active {
                    self.registry.activate_model(key, stored.version).await?;
                    info!("Promoted {} v{}", key, stored.version);
                }
                (true, None)
            }
            Ok(false) => {
                info!("{} v{} kept inactive", key, stored.version);
                (false, None)
            }
            Err(e) => {
                warn!("Promotion check for {} v{} failed: {:#}", key, stored.version, e);
                (false, Some(format!("{:#}", e)))
            }
        };

        Ok(TrainingResult {
            model_key: candidate.model_key,
            interval: candidate.interval,
            version: stored.version,
            metrics: candidate.metrics,
            promoted,
            promotion_error,
        })
    }
}
