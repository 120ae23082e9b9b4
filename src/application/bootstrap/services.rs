use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::application::bootstrap::persistence::PersistenceHandle;
use crate::application::ml::{
    GradientBoostingFamily, GradientBoostingOptions, InferenceService, LogisticRegressionFamily,
    LogisticRegressionOptions, MlSignalService, ModelFamily, OutcomeResolver, TrainingService,
};
use crate::config::Config;
use crate::domain::ports::FeatureEngine;
use crate::infrastructure::observability::Metrics;

pub struct ServicesHandle {
    pub training: Arc<TrainingService>,
    pub inference: Arc<InferenceService>,
    pub resolver: Arc<OutcomeResolver>,
    pub signal_service: Arc<MlSignalService>,
    pub metrics: Metrics,
}

/// Directional families in registry order
pub fn default_families() -> Vec<Arc<dyn ModelFamily>> {
    vec![
        Arc::new(LogisticRegressionFamily::new(
            LogisticRegressionOptions::default(),
        )),
        Arc::new(GradientBoostingFamily::new(GradientBoostingOptions::default())),
    ]
}

pub struct ServicesBootstrap;

impl ServicesBootstrap {
    pub fn init(
        config: &Config,
        persistence: &PersistenceHandle,
        feature_engine: Option<Arc<dyn FeatureEngine>>,
    ) -> Result<ServicesHandle> {
        let families = default_families();
        let metrics = Metrics::new()?;

        let training = Arc::new(TrainingService::new(
            persistence.model_registry.clone(),
            persistence.feature_store.clone(),
            families.clone(),
            config.ml.training_config(),
        ));

        let inference = Arc::new(InferenceService::new(
            persistence.model_registry.clone(),
            persistence.feature_store.clone(),
            persistence.signal_store.clone(),
            persistence.prediction_store.clone(),
            families,
            config.ml.inference_config(),
        ));

        let resolver = Arc::new(OutcomeResolver::new(
            persistence.prediction_store.clone(),
            persistence.candle_repository.clone(),
            config.ml.resolve_batch_size,
        ));

        if feature_engine.is_none() {
            info!("No feature engine wired, feature refresh is skipped");
        }

        let signal_service = Arc::new(MlSignalService::new(
            feature_engine,
            training.clone(),
            inference.clone(),
            resolver.clone(),
            config.ml.intervals.clone(),
            metrics.clone(),
        ));

        Ok(ServicesHandle {
            training,
            inference,
            resolver,
            signal_service,
            metrics,
        })
    }
}
