mod common;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{SYMBOL, bullish_row, hours, separable_rows, small_training_config};
use mlsignal::application::bootstrap::default_families;
use mlsignal::application::ml::{
    InferenceConfig, InferenceService, MlSignalService, OutcomeResolver, TrainingService,
};
use mlsignal::application::system::{Application, CancellationToken};
use mlsignal::config::Config;
use mlsignal::domain::market::Timeframe;
use mlsignal::domain::ports::FeatureEngine;
use mlsignal::infrastructure::observability::Metrics;
use mlsignal::infrastructure::{
    InMemoryCandleRepository, InMemoryFeatureStore, InMemoryModelRegistry,
    InMemoryPredictionStore, InMemorySignalStore,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Writes a synthetic history into the feature store on every refresh
struct SyntheticEngine {
    store: Arc<InMemoryFeatureStore>,
    calls: AtomicUsize,
}

#[async_trait]
impl FeatureEngine for SyntheticEngine {
    async fn refresh(&self, interval: Timeframe, _now: DateTime<Utc>) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if interval != Timeframe::OneHour {
            return Ok(0);
        }
        let mut rows = separable_rows(SYMBOL, 400, 11);
        rows.push(bullish_row(SYMBOL, hours(400)));
        self.store.upsert_rows(&rows).await
    }
}

struct FailingEngine;

#[async_trait]
impl FeatureEngine for FailingEngine {
    async fn refresh(&self, _interval: Timeframe, _now: DateTime<Utc>) -> Result<usize> {
        anyhow::bail!("upstream candles unavailable")
    }
}

fn service(
    features: Arc<InMemoryFeatureStore>,
    engine: Arc<dyn FeatureEngine>,
) -> Result<MlSignalService> {
    let registry = Arc::new(InMemoryModelRegistry::new());
    let predictions = Arc::new(InMemoryPredictionStore::new());
    let training = Arc::new(TrainingService::new(
        registry.clone(),
        features.clone(),
        default_families(),
        small_training_config(),
    ));
    let inference = Arc::new(InferenceService::new(
        registry,
        features,
        Arc::new(InMemorySignalStore::new()),
        predictions.clone(),
        default_families(),
        InferenceConfig {
            intervals: vec![Timeframe::OneHour],
            ..Default::default()
        },
    ));
    let resolver = Arc::new(OutcomeResolver::new(
        predictions,
        Arc::new(InMemoryCandleRepository::new()),
        100,
    ));
    Ok(MlSignalService::new(
        Some(engine),
        training,
        inference,
        resolver,
        vec![Timeframe::OneHour],
        Metrics::new()?,
    ))
}

#[tokio::test]
async fn test_cycle_refreshes_trains_and_infers() -> Result<()> {
    let features = Arc::new(InMemoryFeatureStore::new());
    let engine = Arc::new(SyntheticEngine {
        store: features.clone(),
        calls: AtomicUsize::new(0),
    });
    let service = service(features, engine.clone())?;

    let report = service
        .run_cycle(hours(400), true, &CancellationToken::new())
        .await;

    assert!(report.is_ok(), "cycle failed: {:?}", report.first_error);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.rows_refreshed, 401);
    assert_eq!(report.models_trained, 3);
    assert_eq!(report.models_promoted, 3);
    assert_eq!(report.predictions_written, 4);
    assert_eq!(report.predictions_resolved, 0);

    let rendered = service.metrics().render();
    assert!(rendered.contains("mlsignal_feature_rows_refreshed_total 401"));
    assert!(rendered.contains("mlsignal_active_model_version{model_key=\"logreg\"} 1"));
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_does_not_stop_later_steps() -> Result<()> {
    let features = Arc::new(InMemoryFeatureStore::new());
    let service = service(features, Arc::new(FailingEngine))?;

    let report = service
        .run_cycle(hours(400), false, &CancellationToken::new())
        .await;

    let err = report.first_error.clone().unwrap();
    assert!(err.starts_with("feature refresh"));
    assert!(report.inference.is_some());
    assert!(report.resolution.is_some());
    assert!(
        service
            .metrics()
            .render()
            .contains("mlsignal_cycle_errors_total{step=\"feature refresh\"} 1")
    );
    Ok(())
}

#[tokio::test]
async fn test_cancelled_cycle_stops_immediately() -> Result<()> {
    let features = Arc::new(InMemoryFeatureStore::new());
    let engine = Arc::new(SyntheticEngine {
        store: features.clone(),
        calls: AtomicUsize::new(0),
    });
    let service = service(features, engine.clone())?;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = service.run_cycle(hours(400), true, &cancel).await;

    assert!(report.cancelled);
    assert!(report.first_error.is_none());
    assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    assert!(report.training.is_none());
    Ok(())
}

#[tokio::test]
async fn test_application_on_empty_database() -> Result<()> {
    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        ..Default::default()
    };
    let app = Application::build(config).await?;

    let report = app.run_cycle(false, &CancellationToken::new()).await;
    assert!(report.is_ok());
    assert_eq!(report.predictions_written, 0);

    // a cancelled token ends the scheduler before any tick fires a second time
    let cancel = CancellationToken::new();
    cancel.cancel();
    app.run_scheduled(&cancel).await;
    Ok(())
}
