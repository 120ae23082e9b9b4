use super::inference_service::{InferenceReport, InferenceService};
use super::outcome_resolver::{OutcomeResolver, ResolutionReport};
use super::training_service::{TrainingReport, TrainingService};
use crate::application::system::CancellationToken;
use crate::domain::errors::is_cancelled;
use crate::domain::market::Timeframe;
use crate::domain::ports::FeatureEngine;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Aggregate outcome of one scheduled cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub rows_refreshed: usize,
    pub predictions_written: usize,
    pub signals_emitted: usize,
    pub models_trained: usize,
    pub models_promoted: usize,
    pub predictions_resolved: usize,
    /// Per-model soft failures (promotion checks, skipped sub-runs)
    pub soft_errors: Vec<String>,
    pub first_error: Option<String>,
    pub cancelled: bool,
    pub training: Option<TrainingReport>,
    pub inference: Option<InferenceReport>,
    pub resolution: Option<ResolutionReport>,
}

impl CycleReport {
    pub fn is_ok(&self) -> bool {
        self.first_error.is_none() && !self.cancelled
    }
}

/// Top-level orchestrator invoked by the scheduler.
///
/// Holds no global state: collaborators and configuration are injected at
/// construction.
pub struct MlSignalService {
    feature_engine: Option<Arc<dyn FeatureEngine>>,
    training: Arc<TrainingService>,
    inference: Arc<InferenceService>,
    resolver: Arc<OutcomeResolver>,
    intervals: Vec<Timeframe>,
    metrics: Metrics,
}

impl MlSignalService {
    pub fn new(
        feature_engine: Option<Arc<dyn FeatureEngine>>,
        training: Arc<TrainingService>,
        inference: Arc<InferenceService>,
        resolver: Arc<OutcomeResolver>,
        intervals: Vec<Timeframe>,
        metrics: Metrics,
    ) -> Self {
        Self {
            feature_engine,
            training,
            inference,
            resolver,
            intervals,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Ask the external feature engine to bring every interval up to `now`.
    /// A no-op when no engine is wired.
    pub async fn refresh_features(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let Some(engine) = &self.feature_engine else {
            return Ok(0);
        };
        let mut total = 0;
        for &interval in &self.intervals {
            cancel.check()?;
            let refreshed = engine
                .refresh(interval, now)
                .await
                .with_context(|| format!("Feature refresh failed for {}", interval))?;
            info!("Refreshed {} feature rows on {}", refreshed, interval);
            total += refreshed;
        }
        self.metrics.feature_rows_refreshed.inc_by(total as f64);
        Ok(total)
    }

    pub async fn train(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<TrainingReport> {
        let report = self.training.run(now, cancel).await?;
        for result in &report.results {
            self.metrics.inc_models_trained(&result.model_key);
            if result.promoted {
                self.metrics.inc_models_promoted(&result.model_key);
                self.metrics
                    .set_active_version(&result.model_key, result.version);
            }
        }
        Ok(report)
    }

    pub async fn infer(&self, cancel: &CancellationToken) -> Result<InferenceReport> {
        let report = self.inference.run(cancel).await?;
        for (model_key, count) in &report.predictions_by_model {
            self.metrics.add_predictions(model_key, *count);
        }
        self.metrics
            .signals_emitted
            .inc_by(report.signals_emitted as f64);
        Ok(report)
    }

    pub async fn resolve(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport> {
        let report = self.resolver.resolve_due(now, cancel).await?;
        self.metrics
            .predictions_resolved
            .inc_by(report.resolved as f64);
        Ok(report)
    }

    /// Feature refresh, optional training, inference, then resolution.
    ///
    /// A failing step is recorded (the first one becomes `first_error`) and
    /// the remaining steps still run; cancellation stops the cycle.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        include_training: bool,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let mut report = CycleReport {
            started_at: Some(now),
            ..Default::default()
        };

        match self.refresh_features(now, cancel).await {
            Ok(rows) => report.rows_refreshed = rows,
            Err(e) => {
                if self.record_failure(&mut report, "feature refresh", e) {
                    return report;
                }
            }
        }

        if include_training {
            match self.train(now, cancel).await {
                Ok(training) => {
                    report.models_trained = training.trained();
                    report.models_promoted = training.promoted();
                    for result in &training.results {
                        if let Some(err) = &result.promotion_error {
                            report.soft_errors.push(format!(
                                "{} v{}: {}",
                                result.model_key, result.version, err
                            ));
                        }
                    }
                    for skipped in &training.skipped {
                        report
                            .soft_errors
                            .push(format!("{}: {}", skipped.model_key, skipped.reason));
                    }
                    report.training = Some(training);
                }
                Err(e) => {
                    if self.record_failure(&mut report, "training", e) {
                        return report;
                    }
                }
            }
        }

        match self.infer(cancel).await {
            Ok(inference) => {
                report.predictions_written = inference.predictions_written;
                report.signals_emitted = inference.signals_emitted;
                for key in &inference.skipped_models {
                    report
                        .soft_errors
                        .push(format!("{}: artifact could not be loaded", key));
                }
                report.inference = Some(inference);
            }
            Err(e) => {
                if self.record_failure(&mut report, "inference", e) {
                    return report;
                }
            }
        }

        match self.resolve(now, cancel).await {
            Ok(resolution) => {
                report.predictions_resolved = resolution.resolved;
                report.resolution = Some(resolution);
            }
            Err(e) => {
                self.record_failure(&mut report, "outcome resolution", e);
            }
        }

        info!(
            "Cycle done: refreshed={} predictions={} signals={} trained={} promoted={} resolved={}",
            report.rows_refreshed,
            report.predictions_written,
            report.signals_emitted,
            report.models_trained,
            report.models_promoted,
            report.predictions_resolved
        );
        report
    }

    /// Returns true when the cycle must stop (cancellation)
    fn record_failure(&self, report: &mut CycleReport, step: &str, err: anyhow::Error) -> bool {
        if is_cancelled(&err) {
            warn!("Cycle cancelled during {}", step);
            report.cancelled = true;
            return true;
        }
        error!("{} failed: {:#}", step, err);
        self.metrics.inc_cycle_errors(step);
        if report.first_error.is_none() {
            report.first_error = Some(format!("{}: {:#}", step, err));
        }
        false
    }
}
