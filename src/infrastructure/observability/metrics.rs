//! Prometheus metrics definitions for the ML signal service
//!
//! All metrics use the `mlsignal_` prefix and are read-only.

use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for the training/inference pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Feature rows refreshed by the feature engine
    pub feature_rows_refreshed: Counter,
    /// Predictions written, by model key
    pub predictions_written: CounterVec,
    /// ML signals emitted
    pub signals_emitted: Counter,
    /// Training runs that produced a persisted version, by model key
    pub models_trained: CounterVec,
    /// Versions promoted to active, by model key
    pub models_promoted: CounterVec,
    /// Predictions graded against realised candles
    pub predictions_resolved: Counter,
    /// Failed cycle steps, by step name
    pub cycle_errors: CounterVec,
    /// Active version per model key
    pub active_model_version: GaugeVec,
    /// Wall time of a full cycle
    pub cycle_duration_seconds: Histogram,
    /// Unix time of the last finished cycle
    pub last_cycle_timestamp: Gauge,
    /// Uptime in seconds
    pub uptime_seconds: Gauge,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let feature_rows_refreshed = Counter::with_opts(Opts::new(
            "mlsignal_feature_rows_refreshed_total",
            "Feature rows refreshed before inference",
        ))?;
        registry.register(Box::new(feature_rows_refreshed.clone()))?;

        let predictions_written = CounterVec::new(
            Opts::new(
                "mlsignal_predictions_written_total",
                "Predictions written by model key",
            ),
            &["model_key"],
        )?;
        registry.register(Box::new(predictions_written.clone()))?;

        let signals_emitted = Counter::with_opts(Opts::new(
            "mlsignal_signals_emitted_total",
            "ML signals emitted",
        ))?;
        registry.register(Box::new(signals_emitted.clone()))?;

        let models_trained = CounterVec::new(
            Opts::new("mlsignal_models_trained_total", "Model versions trained"),
            &["model_key"],
        )?;
        registry.register(Box::new(models_trained.clone()))?;

        let models_promoted = CounterVec::new(
            Opts::new("mlsignal_models_promoted_total", "Model versions promoted"),
            &["model_key"],
        )?;
        registry.register(Box::new(models_promoted.clone()))?;

        let predictions_resolved = Counter::with_opts(Opts::new(
            "mlsignal_predictions_resolved_total",
            "Predictions resolved against realised candles",
        ))?;
        registry.register(Box::new(predictions_resolved.clone()))?;

        let cycle_errors = CounterVec::new(
            Opts::new("mlsignal_cycle_errors_total", "Failed cycle steps"),
            &["step"],
        )?;
        registry.register(Box::new(cycle_errors.clone()))?;

        let active_model_version = GaugeVec::new(
            Opts::new(
                "mlsignal_active_model_version",
                "Version currently active per model key",
            ),
            &["model_key"],
        )?;
        registry.register(Box::new(active_model_version.clone()))?;

        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mlsignal_cycle_duration_seconds",
                "Duration of a full refresh/train/infer/resolve cycle",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let last_cycle_timestamp = Gauge::with_opts(Opts::new(
            "mlsignal_last_cycle_timestamp",
            "Unix time of the last finished cycle",
        ))?;
        registry.register(Box::new(last_cycle_timestamp.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "mlsignal_uptime_seconds",
            "Service uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            feature_rows_refreshed,
            predictions_written,
            signals_emitted,
            models_trained,
            models_promoted,
            predictions_resolved,
            cycle_errors,
            active_model_version,
            cycle_duration_seconds,
            last_cycle_timestamp,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn add_predictions(&self, model_key: &str, count: usize) {
        self.predictions_written
            .with_label_values(&[model_key])
            .inc_by(count as f64);
    }

    pub fn inc_models_trained(&self, model_key: &str) {
        self.models_trained.with_label_values(&[model_key]).inc();
    }

    pub fn inc_models_promoted(&self, model_key: &str) {
        self.models_promoted.with_label_values(&[model_key]).inc();
    }

    pub fn set_active_version(&self, model_key: &str, version: i64) {
        self.active_model_version
            .with_label_values(&[model_key])
            .set(version as f64);
    }

    pub fn inc_cycle_errors(&self, step: &str) {
        self.cycle_errors.with_label_values(&[step]).inc();
    }
}
