use crate::application::system::CancellationToken;
use crate::domain::errors::is_no_rows_affected;
use crate::domain::market::Candle;
use crate::domain::ml::model_version::is_anomaly_model_key;
use crate::domain::ml::{Direction, Prediction, PredictionResolution};
use crate::domain::repositories::{CandleRepository, PredictionStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Anomaly detector outputs carry no direction to grade
pub fn should_resolve_prediction(model_key: &str) -> bool {
    !is_anomaly_model_key(model_key)
}

/// Grade a prediction against the close of its open and target candles.
///
/// `None` when the open close is zero (no meaningful return).
pub fn evaluate_outcome(
    prediction: &Prediction,
    open_close: Decimal,
    target_close: Decimal,
    resolved_at: DateTime<Utc>,
) -> Option<PredictionResolution> {
    if open_close.is_zero() {
        return None;
    }
    let actual_up = target_close > open_close;
    let predicted_up = match prediction.direction {
        Direction::Long => true,
        Direction::Short => false,
        Direction::Hold => prediction.prob_up >= 0.5,
    };
    let realized = target_close.checked_div(open_close)? - Decimal::ONE;

    Some(PredictionResolution {
        resolved_at,
        actual_up,
        is_correct: predicted_up == actual_up,
        realized_return: realized.to_f64().unwrap_or(0.0),
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionReport {
    pub examined: usize,
    pub resolved: usize,
    pub skipped_anomaly: usize,
    pub skipped_missing_candles: usize,
    /// Rows another worker resolved first
    pub already_resolved: usize,
}

/// Resolves due predictions against realised candle closes
pub struct OutcomeResolver {
    predictions: Arc<dyn PredictionStore>,
    candles: Arc<dyn CandleRepository>,
    batch_size: usize,
}

impl OutcomeResolver {
    pub fn new(
        predictions: Arc<dyn PredictionStore>,
        candles: Arc<dyn CandleRepository>,
        batch_size: usize,
    ) -> Self {
        Self {
            predictions,
            candles,
            batch_size: batch_size.max(1),
        }
    }

    /// Resolve up to one batch of predictions whose target time has passed.
    ///
    /// Pages through due rows in `(target_time, id)` order, so rows still
    /// waiting on candles never hold back newer resolvable ones. A run ends
    /// once `batch_size` rows are settled or the due rows are exhausted.
    /// Rows resolved before an error stay resolved; the error is returned.
    pub async fn resolve_due(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport> {
        let mut report = ResolutionReport::default();
        let mut cursor: Option<(DateTime<Utc>, i64)> = None;

        'pages: loop {
            let page = self
                .predictions
                .list_unresolved_predictions(now, cursor, self.batch_size)
                .await
                .context("Failed to list unresolved predictions")?;

            for prediction in &page {
                cancel.check()?;
                report.examined += 1;
                self.resolve_one(prediction, now, &mut report).await?;
                if report.resolved + report.already_resolved >= self.batch_size {
                    break 'pages;
                }
            }

            if page.len() < self.batch_size {
                break;
            }
            match page.last().and_then(|p| p.id.map(|id| (p.target_time, id))) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(
            "Resolved {}/{} due predictions ({} awaiting candles)",
            report.resolved, report.examined, report.skipped_missing_candles
        );
        Ok(report)
    }

    async fn resolve_one(
        &self,
        prediction: &Prediction,
        now: DateTime<Utc>,
        report: &mut ResolutionReport,
    ) -> Result<()> {
        if !should_resolve_prediction(&prediction.model_key) {
            report.skipped_anomaly += 1;
            return Ok(());
        }
        let Some(id) = prediction.id else {
            return Ok(());
        };

        let Some((open_close, target_close)) = self.closes_for(prediction).await? else {
            report.skipped_missing_candles += 1;
            return Ok(());
        };
        let Some(resolution) = evaluate_outcome(prediction, open_close, target_close, now) else {
            report.skipped_missing_candles += 1;
            return Ok(());
        };

        match self.predictions.resolve_prediction(id, &resolution).await {
            Ok(()) => report.resolved += 1,
            Err(e) if is_no_rows_affected(&e) => {
                debug!("Prediction {} already resolved", id);
                report.already_resolved += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to resolve prediction {}", id));
            }
        }
        Ok(())
    }

    /// Closes of the candles opening exactly at `open_time` and `target_time`
    async fn closes_for(&self, prediction: &Prediction) -> Result<Option<(Decimal, Decimal)>> {
        let mut candles = self
            .candles
            .get_candles_in_range(
                &prediction.symbol,
                prediction.interval,
                prediction.open_time,
                prediction.target_time,
            )
            .await
            .with_context(|| format!("Failed to load candles for {}", prediction.symbol))?;
        candles.sort_by_key(|c| c.open_time);

        Ok(candle_at(&candles, prediction.open_time)
            .zip(candle_at(&candles, prediction.target_time))
            .map(|(open, target)| (open.close, target.close)))
    }
}

fn candle_at(candles: &[Candle], open_time: DateTime<Utc>) -> Option<&Candle> {
    candles.iter().find(|c| c.open_time == open_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use crate::domain::ml::RiskLevel;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn prediction(direction: Direction, prob_up: f64) -> Prediction {
        let open_time = Utc::now();
        Prediction {
            id: Some(1),
            symbol: "BTCUSDT".to_string(),
            interval: Timeframe::OneHour,
            open_time,
            target_time: open_time + Duration::hours(4),
            model_key: "logreg".to_string(),
            model_version: 1,
            prob_up,
            confidence: 0.5,
            direction,
            risk: RiskLevel::clamped(3),
            signal_id: None,
            details_json: "{}".to_string(),
            resolved_at: None,
            actual_up: None,
            is_correct: None,
            realized_return: None,
        }
    }

    #[test]
    fn test_should_resolve_prediction() {
        assert!(!should_resolve_prediction("iforest_1h"));
        assert!(should_resolve_prediction("logreg"));
        assert!(should_resolve_prediction("ensemble"));
    }

    #[test]
    fn test_long_correct_short_wrong() {
        let now = Utc::now();
        let long = evaluate_outcome(&prediction(Direction::Long, 0.7), dec!(100), dec!(120), now)
            .unwrap();
        assert!(long.actual_up);
        assert!(long.is_correct);
        assert!((long.realized_return - 0.20).abs() < 1e-12);

        let short = evaluate_outcome(&prediction(Direction::Short, 0.3), dec!(100), dec!(120), now)
            .unwrap();
        assert!(!short.is_correct);
    }

    #[test]
    fn test_hold_falls_back_to_probability() {
        let now = Utc::now();
        let down = evaluate_outcome(&prediction(Direction::Hold, 0.4), dec!(100), dec!(90), now)
            .unwrap();
        assert!(!down.actual_up);
        assert!(down.is_correct);
        assert!((down.realized_return + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_zero_open_close_is_skipped() {
        assert!(
            evaluate_outcome(&prediction(Direction::Long, 0.9), dec!(0), dec!(10), Utc::now())
                .is_none()
        );
    }
}
