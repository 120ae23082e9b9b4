use crate::domain::market::Timeframe;
use crate::domain::ml::FeatureRow;
use crate::domain::repositories::FeatureStore;
use crate::infrastructure::persistence::datetime_from_unix;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

pub struct SqliteFeatureStore {
    pool: SqlitePool,
}

impl SqliteFeatureStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write rows produced outside the service (feature engine, CSV import).
    /// Existing rows for the same candle are replaced.
    pub async fn upsert_rows(&self, rows: &[FeatureRow]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let features_json = serde_json::to_string(&row.features)?;
            sqlx::query(
                r#"
                INSERT INTO feature_rows (symbol, interval, open_time, features_json, label)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(symbol, interval, open_time) DO UPDATE SET
                    features_json = excluded.features_json,
                    label = excluded.label
                "#,
            )
            .bind(&row.symbol)
            .bind(row.interval.as_str())
            .bind(row.open_time.timestamp())
            .bind(features_json)
            .bind(row.label)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store feature row for {}", row.symbol))?;
        }
        tx.commit().await?;

        info!("Stored {} feature rows", rows.len());
        Ok(rows.len())
    }

    fn map_row(row: &SqliteRow) -> Result<FeatureRow> {
        let interval: String = row.try_get("interval")?;
        let features_json: String = row.try_get("features_json")?;
        // Non-finite values are written as JSON null
        let features: Vec<Option<f64>> = serde_json::from_str(&features_json)
            .context("Malformed features_json in feature_rows")?;

        Ok(FeatureRow {
            symbol: row.try_get("symbol")?,
            interval: Timeframe::from_str(&interval)?,
            open_time: datetime_from_unix(row.try_get("open_time")?)?,
            features: features
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect(),
            label: row.try_get("label")?,
        })
    }
}

#[async_trait]
impl FeatureStore for SqliteFeatureStore {
    async fn list_labeled_rows(
        &self,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM feature_rows
            WHERE interval = ? AND open_time >= ? AND open_time <= ? AND label IS NOT NULL
            ORDER BY open_time ASC, symbol ASC
            "#,
        )
        .bind(interval.as_str())
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load labeled feature rows for {}", interval))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn list_rows(
        &self,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM feature_rows
            WHERE interval = ? AND open_time >= ? AND open_time <= ?
            ORDER BY open_time ASC, symbol ASC
            "#,
        )
        .bind(interval.as_str())
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load feature rows for {}", interval))?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn list_latest_by_interval(&self, interval: Timeframe) -> Result<Vec<FeatureRow>> {
        let rows = sqlx::query(
            r#"
            SELECT f.* FROM feature_rows f
            JOIN (
                SELECT symbol, MAX(open_time) AS latest
                FROM feature_rows WHERE interval = ?1
                GROUP BY symbol
            ) m ON f.symbol = m.symbol AND f.open_time = m.latest
            WHERE f.interval = ?1
            ORDER BY f.symbol ASC
            "#,
        )
        .bind(interval.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load latest feature rows for {}", interval))?;

        rows.iter().map(Self::map_row).collect()
    }
}
