use crate::domain::market::Timeframe;
use crate::domain::ml::{Direction, RiskLevel, Signal, SignalFilter};
use crate::domain::repositories::SignalStore;
use crate::infrastructure::persistence::datetime_from_unix;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

pub struct SqliteSignalStore {
    pool: SqlitePool,
}

impl SqliteSignalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<Signal> {
        let interval: String = row.try_get("interval")?;
        let direction: String = row.try_get("direction")?;
        Ok(Signal {
            id: Some(row.try_get("id")?),
            symbol: row.try_get("symbol")?,
            interval: Timeframe::from_str(&interval)?,
            indicator: row.try_get("indicator")?,
            timestamp: datetime_from_unix(row.try_get("timestamp")?)?,
            direction: Direction::from_str(&direction)?,
            risk: RiskLevel::new(row.try_get("risk")?)?,
            details: row.try_get("details")?,
        })
    }
}

#[async_trait]
impl SignalStore for SqliteSignalStore {
    async fn insert_signals(&self, signals: &[Signal]) -> Result<Vec<Signal>> {
        if signals.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(signals.len());

        for signal in signals {
            let row = sqlx::query(
                r#"
                INSERT INTO signals (symbol, interval, indicator, timestamp, direction, risk, details)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, interval, indicator, timestamp, direction) DO UPDATE SET
                    risk = excluded.risk,
                    details = excluded.details
                RETURNING id
                "#,
            )
            .bind(&signal.symbol)
            .bind(signal.interval.as_str())
            .bind(&signal.indicator)
            .bind(signal.timestamp.timestamp())
            .bind(signal.direction.as_str())
            .bind(i64::from(signal.risk))
            .bind(&signal.details)
            .fetch_one(&mut *tx)
            .await
            .with_context(|| {
                format!("Failed to insert signal {} {}", signal.indicator, signal.symbol)
            })?;

            let mut saved = signal.clone();
            saved.id = Some(row.try_get("id")?);
            stored.push(saved);
        }

        tx.commit().await?;
        debug!("Persisted {} signals", stored.len());
        Ok(stored)
    }

    async fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM signals
            WHERE (?1 IS NULL OR symbol = ?1)
              AND (?2 IS NULL OR interval = ?2)
              AND (?3 IS NULL OR indicator = ?3)
              AND (?4 IS NULL OR timestamp >= ?4)
              AND (?5 IS NULL OR timestamp <= ?5)
            ORDER BY timestamp ASC, id ASC
            LIMIT ?6
            "#,
        )
        .bind(filter.symbol.as_deref())
        .bind(filter.interval.map(|i| i.as_str()))
        .bind(filter.indicator.as_deref())
        .bind(filter.from.map(|t| t.timestamp()))
        .bind(filter.to.map(|t| t.timestamp()))
        .bind(filter.limit.map(|l| l as i64).unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list signals")?;

        rows.iter().map(Self::map_row).collect()
    }
}
