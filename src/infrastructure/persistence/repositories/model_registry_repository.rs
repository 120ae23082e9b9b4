use crate::domain::errors::MlError;
use crate::domain::ml::{ArtifactFormat, ModelVersion};
use crate::domain::repositories::ModelRegistry;
use crate::infrastructure::persistence::datetime_from_unix;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

pub struct SqliteModelRegistry {
    pool: SqlitePool,
}

impl SqliteModelRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<ModelVersion> {
        let format: String = row.try_get("artifact_format")?;
        Ok(ModelVersion {
            id: Some(row.try_get("id")?),
            model_key: row.try_get("model_key")?,
            version: row.try_get("version")?,
            trained_from: datetime_from_unix(row.try_get("trained_from")?)?,
            trained_to: datetime_from_unix(row.try_get("trained_to")?)?,
            hyperparameters_json: row.try_get("hyperparameters_json")?,
            metrics_json: row.try_get("metrics_json")?,
            artifact_format: ArtifactFormat::from_str(&format)?,
            artifact_blob: row.try_get("artifact_blob")?,
            is_active: row.try_get("is_active")?,
            created_at: datetime_from_unix(row.try_get("created_at")?)?,
        })
    }
}

#[async_trait]
impl ModelRegistry for SqliteModelRegistry {
    async fn next_version(&self, model_key: &str) -> Result<i64> {
        // Single statement: SQLite serializes writers, so two callers can
        // never observe the same counter value.
        let row = sqlx::query(
            r#"
            INSERT INTO model_version_counters (model_key, last_version)
            VALUES (?, COALESCE((SELECT MAX(version) FROM model_versions WHERE model_key = ?), 0) + 1)
            ON CONFLICT(model_key) DO UPDATE SET last_version = last_version + 1
            RETURNING last_version
            "#,
        )
        .bind(model_key)
        .bind(model_key)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to allocate version for {}", model_key))?;

        Ok(row.try_get("last_version")?)
    }

    async fn insert_model_version(&self, version: &ModelVersion) -> Result<ModelVersion> {
        let row = sqlx::query(
            r#"
            INSERT INTO model_versions
            (model_key, version, trained_from, trained_to, hyperparameters_json, metrics_json,
             artifact_format, artifact_blob, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING id
            "#,
        )
        .bind(&version.model_key)
        .bind(version.version)
        .bind(version.trained_from.timestamp())
        .bind(version.trained_to.timestamp())
        .bind(&version.hyperparameters_json)
        .bind(&version.metrics_json)
        .bind(version.artifact_format.to_string())
        .bind(&version.artifact_blob)
        .bind(version.created_at.timestamp())
        .fetch_one(&self.pool)
        .await
        .with_context(|| {
            format!(
                "Failed to insert model version {} v{}",
                version.model_key, version.version
            )
        })?;

        let mut stored = version.clone();
        stored.id = Some(row.try_get("id")?);
        stored.is_active = false;
        Ok(stored)
    }

    async fn get_active_model(&self, model_key: &str) -> Result<Option<ModelVersion>> {
        let row = sqlx::query("SELECT * FROM model_versions WHERE model_key = ? AND is_active = 1")
            .bind(model_key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load active model {}", model_key))?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn activate_model(&self, model_key: &str, version: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE model_versions SET is_active = 0 WHERE model_key = ? AND is_active = 1")
            .bind(model_key)
            .execute(&mut *tx)
            .await
            .context("Failed to deactivate previous model version")?;

        let result =
            sqlx::query("UPDATE model_versions SET is_active = 1 WHERE model_key = ? AND version = ?")
                .bind(model_key)
                .bind(version)
                .execute(&mut *tx)
                .await
                .context("Failed to activate model version")?;

        if result.rows_affected() == 0 {
            // Dropping the transaction rolls back the deactivation
            return Err(MlError::ModelVersionNotFound {
                model_key: model_key.to_string(),
                version,
            }
            .into());
        }

        tx.commit().await?;
        info!("Activated model {} v{}", model_key, version);
        Ok(())
    }

    async fn get_model_version(
        &self,
        model_key: &str,
        version: i64,
    ) -> Result<Option<ModelVersion>> {
        let row = sqlx::query("SELECT * FROM model_versions WHERE model_key = ? AND version = ?")
            .bind(model_key)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_model_versions(&self, model_key: &str) -> Result<Vec<ModelVersion>> {
        let rows =
            sqlx::query("SELECT * FROM model_versions WHERE model_key = ? ORDER BY version DESC")
                .bind(model_key)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(Self::map_row).collect()
    }
}
