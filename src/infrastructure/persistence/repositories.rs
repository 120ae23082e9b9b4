pub mod feature_repository;
pub mod model_registry_repository;
pub mod prediction_repository;
pub mod signal_repository;

pub use feature_repository::SqliteFeatureStore;
pub use model_registry_repository::SqliteModelRegistry;
pub use prediction_repository::SqlitePredictionStore;
pub use signal_repository::SqliteSignalStore;

use crate::domain::market::{Candle, Timeframe};
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::persistence::datetime_from_unix;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Candles are owned by the market-data ingester; this is for imports and tests
    pub async fn save_candles(&self, candles: &[Candle]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO candles (symbol, interval, open_time, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&candle.symbol)
            .bind(candle.interval.as_str())
            .bind(candle.open_time.timestamp())
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to save candle")?;
        }
        tx.commit().await?;
        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<Candle> {
        let interval: String = row.try_get("interval")?;
        let decimal = |column: &str| -> Result<Decimal> {
            let raw: String = row.try_get(column)?;
            Decimal::from_str(&raw).with_context(|| format!("Invalid decimal in {}: {}", column, raw))
        };

        Ok(Candle {
            symbol: row.try_get("symbol")?,
            interval: Timeframe::from_str(&interval)?,
            open_time: datetime_from_unix(row.try_get("open_time")?)?,
            open: decimal("open")?,
            high: decimal("high")?,
            low: decimal("low")?,
            close: decimal("close")?,
            volume: decimal("volume")?,
        })
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM candles WHERE symbol = ? AND interval = ?
                ORDER BY open_time DESC LIMIT ?
            ) ORDER BY open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load candles")?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn get_candles_in_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles
            WHERE symbol = ? AND interval = ? AND open_time >= ? AND open_time <= ?
            ORDER BY open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(from.timestamp())
        .bind(to.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load candle range")?;

        rows.iter().map(Self::map_row).collect()
    }
}
