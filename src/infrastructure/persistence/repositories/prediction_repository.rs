use crate::domain::errors::MlError;
use crate::domain::market::Timeframe;
use crate::domain::ml::model_version::ANOMALY_MODEL_KEY_PREFIX;
use crate::domain::ml::{Direction, Prediction, PredictionFilter, PredictionResolution, RiskLevel};
use crate::domain::repositories::PredictionStore;
use crate::infrastructure::persistence::{datetime_from_unix, optional_datetime};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqlitePredictionStore {
    pool: SqlitePool,
}

impl SqlitePredictionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<Prediction> {
        let interval: String = row.try_get("interval")?;
        let direction: String = row.try_get("direction")?;
        Ok(Prediction {
            id: Some(row.try_get("id")?),
            symbol: row.try_get("symbol")?,
            interval: Timeframe::from_str(&interval)?,
            open_time: datetime_from_unix(row.try_get("open_time")?)?,
            target_time: datetime_from_unix(row.try_get("target_time")?)?,
            model_key: row.try_get("model_key")?,
            model_version: row.try_get("model_version")?,
            prob_up: row.try_get("prob_up")?,
            confidence: row.try_get("confidence")?,
            direction: Direction::from_str(&direction)?,
            risk: RiskLevel::new(row.try_get("risk")?)?,
            signal_id: row.try_get("signal_id")?,
            details_json: row.try_get("details_json")?,
            resolved_at: optional_datetime(row.try_get("resolved_at")?)?,
            actual_up: row.try_get("actual_up")?,
            is_correct: row.try_get("is_correct")?,
            realized_return: row.try_get("realized_return")?,
        })
    }
}

#[async_trait]
impl PredictionStore for SqlitePredictionStore {
    async fn upsert_prediction(&self, prediction: &Prediction) -> Result<Prediction> {
        // Unresolved rows get fresh model output; signal_id is cleared and
        // re-attached by the caller for directional rows. Resolved rows are
        // frozen so the graded direction always matches is_correct.
        let updated = sqlx::query(
            r#"
            INSERT INTO predictions
            (symbol, interval, open_time, target_time, model_key, model_version,
             prob_up, confidence, direction, risk, details_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, interval, open_time, model_key, model_version) DO UPDATE SET
                target_time = excluded.target_time,
                prob_up = excluded.prob_up,
                confidence = excluded.confidence,
                direction = excluded.direction,
                risk = excluded.risk,
                details_json = excluded.details_json,
                signal_id = NULL,
                updated_at = strftime('%s', 'now')
            WHERE predictions.resolved_at IS NULL
            RETURNING *
            "#,
        )
        .bind(&prediction.symbol)
        .bind(prediction.interval.as_str())
        .bind(prediction.open_time.timestamp())
        .bind(prediction.target_time.timestamp())
        .bind(&prediction.model_key)
        .bind(prediction.model_version)
        .bind(prediction.prob_up)
        .bind(prediction.confidence)
        .bind(prediction.direction.as_str())
        .bind(i64::from(prediction.risk))
        .bind(&prediction.details_json)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to upsert prediction {} {} {} v{}",
                prediction.symbol,
                prediction.interval,
                prediction.model_key,
                prediction.model_version
            )
        })?;

        if let Some(row) = updated {
            return Self::map_row(&row);
        }

        let row = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE symbol = ? AND interval = ? AND open_time = ? AND model_key = ? AND model_version = ?
            "#,
        )
        .bind(&prediction.symbol)
        .bind(prediction.interval.as_str())
        .bind(prediction.open_time.timestamp())
        .bind(&prediction.model_key)
        .bind(prediction.model_version)
        .fetch_one(&self.pool)
        .await
        .context("Failed to load resolved prediction")?;

        Self::map_row(&row)
    }

    async fn attach_signal_id(&self, prediction_id: i64, signal_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE predictions SET signal_id = ?, updated_at = strftime('%s', 'now') WHERE id = ?",
        )
        .bind(signal_id)
        .bind(prediction_id)
        .execute(&self.pool)
        .await
        .context("Failed to attach signal to prediction")?;

        if result.rows_affected() == 0 {
            return Err(MlError::NoRowsAffected {
                entity: "prediction",
                id: prediction_id,
            }
            .into());
        }
        Ok(())
    }

    async fn list_unresolved_predictions(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, i64)>,
        limit: usize,
    ) -> Result<Vec<Prediction>> {
        let after_time = after.map(|(t, _)| t.timestamp());
        let after_id = after.map(|(_, id)| id);
        let rows = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE resolved_at IS NULL AND target_time <= ? AND model_key NOT LIKE ? || '%'
              AND (? IS NULL OR target_time > ? OR (target_time = ? AND id > ?))
            ORDER BY target_time ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(now.timestamp())
        .bind(ANOMALY_MODEL_KEY_PREFIX)
        .bind(after_time)
        .bind(after_time)
        .bind(after_time)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list unresolved predictions")?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn resolve_prediction(
        &self,
        prediction_id: i64,
        resolution: &PredictionResolution,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE predictions
            SET resolved_at = ?, actual_up = ?, is_correct = ?, realized_return = ?,
                updated_at = strftime('%s', 'now')
            WHERE id = ? AND resolved_at IS NULL
            "#,
        )
        .bind(resolution.resolved_at.timestamp())
        .bind(resolution.actual_up)
        .bind(resolution.is_correct)
        .bind(resolution.realized_return)
        .bind(prediction_id)
        .execute(&self.pool)
        .await
        .context("Failed to resolve prediction")?;

        if result.rows_affected() == 0 {
            return Err(MlError::NoRowsAffected {
                entity: "prediction",
                id: prediction_id,
            }
            .into());
        }
        Ok(())
    }

    async fn list_predictions(&self, filter: &PredictionFilter) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM predictions
            WHERE (?1 IS NULL OR symbol = ?1)
              AND (?2 IS NULL OR interval = ?2)
              AND (?3 IS NULL OR model_key = ?3)
              AND (?4 IS NULL OR open_time >= ?4)
              AND (?5 IS NULL OR open_time <= ?5)
            ORDER BY open_time DESC, id DESC
            LIMIT ?6
            "#,
        )
        .bind(filter.symbol.as_deref())
        .bind(filter.interval.map(|i| i.as_str()))
        .bind(filter.model_key.as_deref())
        .bind(filter.from.map(|t| t.timestamp()))
        .bind(filter.to.map(|t| t.timestamp()))
        .bind(filter.limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list predictions")?;

        rows.iter().map(Self::map_row).collect()
    }
}
