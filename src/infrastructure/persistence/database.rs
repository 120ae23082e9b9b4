use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite pool with the ML schema applied
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        let in_memory = db_url.contains(":memory:");

        // Ensure the directory exists if it's a file path
        if !in_memory && let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let mut options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` opens its own database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Initialize database schema
    pub async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Model registry
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model_key TEXT NOT NULL,
                version INTEGER NOT NULL,
                trained_from INTEGER NOT NULL,
                trained_to INTEGER NOT NULL,
                hyperparameters_json TEXT NOT NULL,
                metrics_json TEXT NOT NULL,
                artifact_format TEXT NOT NULL,
                artifact_blob BLOB NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (model_key, version)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_model_versions_one_active
            ON model_versions (model_key) WHERE is_active = 1;
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create model_versions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_version_counters (
                model_key TEXT PRIMARY KEY,
                last_version INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create model_version_counters table")?;

        // 2. Predictions
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                target_time INTEGER NOT NULL,
                model_key TEXT NOT NULL,
                model_version INTEGER NOT NULL,
                prob_up REAL NOT NULL,
                confidence REAL NOT NULL,
                direction TEXT NOT NULL,
                risk INTEGER NOT NULL,
                signal_id INTEGER,
                details_json TEXT NOT NULL DEFAULT '{}',
                resolved_at INTEGER,
                actual_up BOOLEAN,
                is_correct BOOLEAN,
                realized_return REAL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                UNIQUE (symbol, interval, open_time, model_key, model_version)
            );
            CREATE INDEX IF NOT EXISTS idx_predictions_unresolved
            ON predictions (resolved_at, target_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create predictions table")?;

        // 3. Signals (classic and ML)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                indicator TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                direction TEXT NOT NULL,
                risk INTEGER NOT NULL,
                details TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                UNIQUE (symbol, interval, indicator, timestamp, direction)
            );
            CREATE INDEX IF NOT EXISTS idx_signals_symbol_time
            ON signals (symbol, interval, timestamp);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals table")?;

        // 4. Feature rows (written by the feature engine)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feature_rows (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                features_json TEXT NOT NULL,
                label BOOLEAN,
                PRIMARY KEY (symbol, interval, open_time)
            );
            CREATE INDEX IF NOT EXISTS idx_feature_rows_interval_time
            ON feature_rows (interval, open_time);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create feature_rows table")?;

        // 5. Candles (written by the market data collector)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                PRIMARY KEY (symbol, interval, open_time)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candles table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
