use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::repositories::{
    CandleRepository, FeatureStore, ModelRegistry, PredictionStore, SignalStore,
};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteCandleRepository, SqliteFeatureStore, SqliteModelRegistry, SqlitePredictionStore,
    SqliteSignalStore,
};

pub struct PersistenceHandle {
    pub db: Database,
    pub model_registry: Arc<dyn ModelRegistry>,
    pub feature_store: Arc<dyn FeatureStore>,
    pub candle_repository: Arc<dyn CandleRepository>,
    pub signal_store: Arc<dyn SignalStore>,
    pub prediction_store: Arc<dyn PredictionStore>,
}

pub struct PersistenceBootstrap;

impl PersistenceBootstrap {
    pub async fn init(db_url: &str) -> Result<PersistenceHandle> {
        info!("Initializing Database at {}", db_url);

        let db = Database::new(db_url)
            .await
            .context("Failed to initialize database")?;

        Ok(Self::from_database(db))
    }

    pub fn from_database(db: Database) -> PersistenceHandle {
        PersistenceHandle {
            model_registry: Arc::new(SqliteModelRegistry::new(db.pool.clone())),
            feature_store: Arc::new(SqliteFeatureStore::new(db.pool.clone())),
            candle_repository: Arc::new(SqliteCandleRepository::new(db.pool.clone())),
            signal_store: Arc::new(SqliteSignalStore::new(db.pool.clone())),
            prediction_store: Arc::new(SqlitePredictionStore::new(db.pool.clone())),
            db,
        }
    }
}
