mod common;

use common::{SYMBOL, candle, hours};
use mlsignal::application::ml::OutcomeResolver;
use mlsignal::application::system::CancellationToken;
use mlsignal::domain::market::Timeframe;
use mlsignal::domain::ml::{Direction, Prediction, PredictionFilter, RiskLevel};
use mlsignal::domain::repositories::PredictionStore;
use mlsignal::infrastructure::persistence::Database;
use mlsignal::infrastructure::persistence::repositories::{
    SqliteCandleRepository, SqlitePredictionStore,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn prediction(symbol: &str, model_key: &str, direction: Direction, open_hour: i64) -> Prediction {
    Prediction {
        id: None,
        symbol: symbol.to_string(),
        interval: Timeframe::OneHour,
        open_time: hours(open_hour),
        target_time: hours(open_hour + 4),
        model_key: model_key.to_string(),
        model_version: 1,
        prob_up: if direction == Direction::Short { 0.3 } else { 0.7 },
        confidence: 0.4,
        direction,
        risk: RiskLevel::clamped(4),
        signal_id: None,
        details_json: "{}".to_string(),
        resolved_at: None,
        actual_up: None,
        is_correct: None,
        realized_return: None,
    }
}

async fn setup() -> anyhow::Result<(
    Arc<SqlitePredictionStore>,
    Arc<SqliteCandleRepository>,
    OutcomeResolver,
)> {
    let db = Database::in_memory().await?;
    let predictions = Arc::new(SqlitePredictionStore::new(db.pool.clone()));
    let candles = Arc::new(SqliteCandleRepository::new(db.pool.clone()));
    let resolver = OutcomeResolver::new(predictions.clone(), candles.clone(), 100);
    Ok((predictions, candles, resolver))
}

#[tokio::test]
async fn test_due_predictions_are_graded_against_candles() -> anyhow::Result<()> {
    let (predictions, candles, resolver) = setup().await?;
    candles
        .save_candles(&[
            candle(SYMBOL, hours(0), dec!(100)),
            candle(SYMBOL, hours(4), dec!(105)),
        ])
        .await?;
    predictions
        .upsert_prediction(&prediction(SYMBOL, "logreg", Direction::Long, 0))
        .await?;
    predictions
        .upsert_prediction(&prediction(SYMBOL, "xgboost", Direction::Short, 0))
        .await?;

    let report = resolver
        .resolve_due(hours(6), &CancellationToken::new())
        .await?;
    assert_eq!(report.examined, 2);
    assert_eq!(report.resolved, 2);

    let resolved = predictions
        .list_predictions(&PredictionFilter::default())
        .await?;
    let long = resolved.iter().find(|p| p.model_key == "logreg").unwrap();
    let short = resolved.iter().find(|p| p.model_key == "xgboost").unwrap();
    assert_eq!(long.actual_up, Some(true));
    assert_eq!(long.is_correct, Some(true));
    assert_eq!(short.is_correct, Some(false));
    let realized = long.realized_return.unwrap();
    assert!((realized - 0.05).abs() < 1e-9);
    assert_eq!(long.resolved_at, Some(hours(6)));
    Ok(())
}

#[tokio::test]
async fn test_predictions_are_only_resolved_once() -> anyhow::Result<()> {
    let (predictions, candles, resolver) = setup().await?;
    candles
        .save_candles(&[
            candle(SYMBOL, hours(0), dec!(100)),
            candle(SYMBOL, hours(4), dec!(95)),
        ])
        .await?;
    predictions
        .upsert_prediction(&prediction(SYMBOL, "ensemble", Direction::Short, 0))
        .await?;
    let cancel = CancellationToken::new();

    assert_eq!(resolver.resolve_due(hours(6), &cancel).await?.resolved, 1);
    let again = resolver.resolve_due(hours(7), &cancel).await?;
    assert_eq!(again.examined, 0);
    assert_eq!(again.resolved, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_candles_leave_prediction_pending() -> anyhow::Result<()> {
    let (predictions, candles, resolver) = setup().await?;
    // open candle only; the target bar has not been ingested yet
    candles
        .save_candles(&[candle(SYMBOL, hours(0), dec!(100))])
        .await?;
    predictions
        .upsert_prediction(&prediction(SYMBOL, "logreg", Direction::Long, 0))
        .await?;

    let report = resolver
        .resolve_due(hours(6), &CancellationToken::new())
        .await?;
    assert_eq!(report.skipped_missing_candles, 1);
    assert_eq!(report.resolved, 0);
    assert_eq!(
        predictions.list_unresolved_predictions(hours(6), None, 10).await?.len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_future_and_anomaly_predictions_are_not_due() -> anyhow::Result<()> {
    let (predictions, candles, resolver) = setup().await?;
    candles
        .save_candles(&[
            candle(SYMBOL, hours(0), dec!(100)),
            candle(SYMBOL, hours(4), dec!(101)),
        ])
        .await?;
    predictions
        .upsert_prediction(&prediction(SYMBOL, "iforest_1h", Direction::Hold, 0))
        .await?;
    predictions
        .upsert_prediction(&prediction(SYMBOL, "logreg", Direction::Long, 10))
        .await?;

    let report = resolver
        .resolve_due(hours(6), &CancellationToken::new())
        .await?;
    assert_eq!(report.examined, 0);

    let anomaly = predictions
        .list_predictions(&PredictionFilter {
            model_key: Some("iforest_1h".to_string()),
            ..Default::default()
        })
        .await?;
    assert!(anomaly[0].resolved_at.is_none());
    Ok(())
}

#[tokio::test]
async fn test_batch_size_caps_one_pass() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let predictions = Arc::new(SqlitePredictionStore::new(db.pool.clone()));
    let candles = Arc::new(SqliteCandleRepository::new(db.pool.clone()));
    let resolver = OutcomeResolver::new(predictions.clone(), candles.clone(), 2);

    let mut bars = Vec::new();
    for hour in 0..10 {
        bars.push(candle(SYMBOL, hours(hour), dec!(100) + rust_decimal::Decimal::from(hour)));
    }
    candles.save_candles(&bars).await?;
    for open in 0..5 {
        predictions
            .upsert_prediction(&prediction(SYMBOL, "logreg", Direction::Long, open))
            .await?;
    }
    let cancel = CancellationToken::new();

    assert_eq!(resolver.resolve_due(hours(20), &cancel).await?.resolved, 2);
    assert_eq!(resolver.resolve_due(hours(20), &cancel).await?.resolved, 2);
    assert_eq!(resolver.resolve_due(hours(20), &cancel).await?.resolved, 1);
    Ok(())
}

#[tokio::test]
async fn test_rows_awaiting_candles_do_not_block_newer_rows() -> anyhow::Result<()> {
    let db = Database::in_memory().await?;
    let predictions = Arc::new(SqlitePredictionStore::new(db.pool.clone()));
    let candles = Arc::new(SqliteCandleRepository::new(db.pool.clone()));
    let resolver = OutcomeResolver::new(predictions.clone(), candles.clone(), 2);

    // two older rows for a symbol that never got candles fill a whole batch
    predictions
        .upsert_prediction(&prediction("GAPUSDT", "logreg", Direction::Long, 0))
        .await?;
    predictions
        .upsert_prediction(&prediction("GAPUSDT", "logreg", Direction::Long, 1))
        .await?;
    candles
        .save_candles(&[
            candle(SYMBOL, hours(10), dec!(100)),
            candle(SYMBOL, hours(14), dec!(120)),
        ])
        .await?;
    predictions
        .upsert_prediction(&prediction(SYMBOL, "logreg", Direction::Long, 10))
        .await?;

    let report = resolver
        .resolve_due(hours(100), &CancellationToken::new())
        .await?;
    assert_eq!(report.examined, 3);
    assert_eq!(report.skipped_missing_candles, 2);
    assert_eq!(report.resolved, 1);

    let btc = predictions
        .list_predictions(&PredictionFilter {
            symbol: Some(SYMBOL.to_string()),
            ..Default::default()
        })
        .await?;
    assert!(btc[0].resolved_at.is_some());
    assert_eq!(btc[0].is_correct, Some(true));

    let pending = predictions
        .list_unresolved_predictions(hours(100), None, 10)
        .await?;
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|p| p.symbol == "GAPUSDT"));
    Ok(())
}
