mod common;

use common::{SYMBOL, base_time, hours, separable_rows};
use mlsignal::domain::errors::{MlError, is_no_rows_affected};
use mlsignal::domain::market::Timeframe;
use mlsignal::domain::ml::{
    ArtifactFormat, Direction, ModelVersion, Prediction, PredictionFilter, PredictionResolution,
    RiskLevel, Signal, SignalFilter,
};
use mlsignal::domain::repositories::{FeatureStore, ModelRegistry, PredictionStore, SignalStore};
use mlsignal::infrastructure::persistence::Database;
use mlsignal::infrastructure::persistence::repositories::{
    SqliteFeatureStore, SqliteModelRegistry, SqlitePredictionStore, SqliteSignalStore,
};
use std::sync::Arc;

fn version(key: &str, v: i64) -> ModelVersion {
    ModelVersion::new(
        key,
        v,
        base_time(),
        hours(100),
        "{}".to_string(),
        r#"{"auc":0.61}"#.to_string(),
        ArtifactFormat::Json,
        format!("artifact-{}", v).into_bytes(),
    )
}

fn prediction(model_key: &str, prob_up: f64) -> Prediction {
    Prediction {
        id: None,
        symbol: SYMBOL.to_string(),
        interval: Timeframe::OneHour,
        open_time: hours(10),
        target_time: hours(14),
        model_key: model_key.to_string(),
        model_version: 1,
        prob_up,
        confidence: (prob_up - 0.5).abs() * 2.0,
        direction: Direction::Long,
        risk: RiskLevel::clamped(3),
        signal_id: None,
        details_json: "{}".to_string(),
        resolved_at: None,
        actual_up: None,
        is_correct: None,
        realized_return: None,
    }
}

#[tokio::test]
async fn test_next_version_is_monotonic_per_key() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let registry = SqliteModelRegistry::new(db.pool.clone());

    assert_eq!(registry.next_version("logreg").await?, 1);
    assert_eq!(registry.next_version("logreg").await?, 2);
    assert_eq!(registry.next_version("xgboost").await?, 1);
    assert_eq!(registry.next_version("logreg").await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_next_version_never_repeats() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let registry = Arc::new(SqliteModelRegistry::new(db.pool.clone()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(
            async move { registry.next_version("logreg").await },
        ));
    }

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await??);
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=8).collect::<Vec<i64>>());
    Ok(())
}

#[tokio::test]
async fn test_activation_keeps_exactly_one_active_version() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let registry = SqliteModelRegistry::new(db.pool.clone());

    for v in 1..=3 {
        let stored = registry.insert_model_version(&version("logreg", v)).await?;
        assert!(stored.id.is_some());
        assert!(!stored.is_active);
    }
    assert!(registry.get_active_model("logreg").await?.is_none());

    registry.activate_model("logreg", 1).await?;
    registry.activate_model("logreg", 3).await?;

    let active = registry.get_active_model("logreg").await?.unwrap();
    assert_eq!(active.version, 3);
    assert_eq!(active.artifact_blob, b"artifact-3".to_vec());
    assert_eq!(active.metric("auc")?, Some(0.61));

    let versions = registry.list_model_versions("logreg").await?;
    assert_eq!(versions.len(), 3);
    assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    assert_eq!(versions[0].version, 3);
    Ok(())
}

#[tokio::test]
async fn test_activating_unknown_version_keeps_current() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let registry = SqliteModelRegistry::new(db.pool.clone());

    registry.insert_model_version(&version("xgboost", 1)).await?;
    registry.activate_model("xgboost", 1).await?;

    let err = registry.activate_model("xgboost", 9).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MlError>(),
        Some(MlError::ModelVersionNotFound { version: 9, .. })
    ));

    let active = registry.get_active_model("xgboost").await?.unwrap();
    assert_eq!(active.version, 1);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_version_insert_is_rejected() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let registry = SqliteModelRegistry::new(db.pool.clone());

    registry.insert_model_version(&version("logreg", 1)).await?;
    assert!(registry.insert_model_version(&version("logreg", 1)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_prediction_upsert_is_idempotent() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let store = SqlitePredictionStore::new(db.pool.clone());

    let first = store.upsert_prediction(&prediction("logreg", 0.7)).await?;
    let mut refreshed = prediction("logreg", 0.8);
    refreshed.confidence = 0.65;
    refreshed.details_json = r#"{"p_logreg":0.8}"#.to_string();
    let second = store.upsert_prediction(&refreshed).await?;

    assert_eq!(first.id, second.id);
    assert_eq!(second.prob_up, 0.8);
    assert_eq!(second.confidence, 0.65);
    assert_eq!(second.details_json, r#"{"p_logreg":0.8}"#);

    let all = store.list_predictions(&PredictionFilter::default()).await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, first.id);
    assert_eq!(all[0].confidence, 0.65);
    assert_eq!(all[0].details_json, r#"{"p_logreg":0.8}"#);
    Ok(())
}

#[tokio::test]
async fn test_resolution_happens_once_and_survives_upsert() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let store = SqlitePredictionStore::new(db.pool.clone());

    let stored = store.upsert_prediction(&prediction("logreg", 0.7)).await?;
    let id = stored.id.unwrap();
    let resolution = PredictionResolution {
        resolved_at: hours(15),
        actual_up: true,
        is_correct: true,
        realized_return: 0.012,
    };

    store.resolve_prediction(id, &resolution).await?;
    let err = store.resolve_prediction(id, &resolution).await.unwrap_err();
    assert!(is_no_rows_affected(&err));

    let mut flipped = prediction("logreg", 0.2);
    flipped.direction = Direction::Short;
    let refreshed = store.upsert_prediction(&flipped).await?;
    assert_eq!(refreshed.id, Some(id));
    assert_eq!(refreshed.resolved_at, Some(hours(15)));
    assert_eq!(refreshed.is_correct, Some(true));
    // graded fields are frozen once resolved
    assert_eq!(refreshed.prob_up, 0.7);
    assert_eq!(refreshed.direction, Direction::Long);
    assert!(store.list_unresolved_predictions(hours(100), None, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unresolved_listing_skips_anomaly_rows() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let store = SqlitePredictionStore::new(db.pool.clone());

    store.upsert_prediction(&prediction("iforest_1h", 0.5)).await?;
    store.upsert_prediction(&prediction("ensemble", 0.9)).await?;

    let due = store.list_unresolved_predictions(hours(14), None, 10).await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].model_key, "ensemble");

    // not yet due
    assert!(store.list_unresolved_predictions(hours(13), None, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unresolved_listing_pages_by_cursor() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let store = SqlitePredictionStore::new(db.pool.clone());

    // three rows sharing one target time, so the id breaks the tie
    for key in ["logreg", "xgboost", "ensemble"] {
        store.upsert_prediction(&prediction(key, 0.7)).await?;
    }

    let first = store.list_unresolved_predictions(hours(14), None, 2).await?;
    assert_eq!(first.len(), 2);
    let cursor = (first[1].target_time, first[1].id.unwrap());

    let rest = store
        .list_unresolved_predictions(hours(14), Some(cursor), 2)
        .await?;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].model_key, "ensemble");
    assert!(rest[0].id > first[1].id);
    Ok(())
}

#[tokio::test]
async fn test_signal_upsert_returns_stable_id() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let store = SqliteSignalStore::new(db.pool.clone());

    let signal = Signal::new(
        SYMBOL,
        Timeframe::OneHour,
        "ml_logreg",
        hours(10),
        Direction::Long,
        RiskLevel::clamped(3),
        "{}".to_string(),
    );
    let first = store.insert_signals(&[signal.clone()]).await?;

    let mut refreshed = signal;
    refreshed.risk = RiskLevel::clamped(2);
    let second = store.insert_signals(&[refreshed]).await?;

    assert_eq!(first[0].id, second[0].id);
    let listed = store
        .list_signals(&SignalFilter::at(SYMBOL, Timeframe::OneHour, hours(10)))
        .await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].risk.value(), 2);
    Ok(())
}

#[tokio::test]
async fn test_attach_signal_to_missing_prediction_fails() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let store = SqlitePredictionStore::new(db.pool.clone());

    let err = store.attach_signal_id(404, 1).await.unwrap_err();
    assert!(is_no_rows_affected(&err));
    Ok(())
}

#[tokio::test]
async fn test_feature_store_latest_row_per_symbol() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let store = SqliteFeatureStore::new(db.pool.clone());

    let mut rows = separable_rows(SYMBOL, 20, 3);
    rows.extend(separable_rows("ETHUSDT", 12, 4));
    assert_eq!(store.upsert_rows(&rows).await?, 32);

    let latest = store.list_latest_by_interval(Timeframe::OneHour).await?;
    assert_eq!(latest.len(), 2);
    let btc = latest.iter().find(|r| r.symbol == SYMBOL).unwrap();
    let eth = latest.iter().find(|r| r.symbol == "ETHUSDT").unwrap();
    assert_eq!(btc.open_time, hours(19));
    assert_eq!(eth.open_time, hours(11));
    assert_eq!(btc.features.len(), rows[0].features.len());

    let labeled = store
        .list_labeled_rows(Timeframe::OneHour, hours(0), hours(5))
        .await?;
    assert_eq!(labeled.len(), 12);
    assert!(labeled.windows(2).all(|w| w[0].open_time <= w[1].open_time));

    assert!(
        store
            .list_latest_by_interval(Timeframe::FourHour)
            .await?
            .is_empty()
    );
    Ok(())
}
