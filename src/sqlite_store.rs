//! SQLite-backed [`ProgressStore`] implementation.
//!
//! One row per [`ProgressKey`] in `chunk_progress`; the full
//! [`ChunkProgress`] is stored as JSON in `payload_json`. Saving upserts.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::checkpoint::{ChunkProgress, ProgressKey, ProgressStore};
use crate::error::{ClassifyError, Result};

/// Durable checkpoint store over a [`SqlitePool`].
pub struct SqliteProgressStore {
    pool: SqlitePool,
}

impl SqliteProgressStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path`, creating the file and schema if needed.
    pub async fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        let pool = crate::db::connect(path).await?;
        crate::migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_err(e: impl std::fmt::Display) -> ClassifyError {
    ClassifyError::Store(e.to_string())
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn get(&self, key: &ProgressKey) -> Result<Option<ChunkProgress>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload_json FROM chunk_progress WHERE analysis_id = ? AND language = ? AND model = ?",
        )
        .bind(&key.analysis_id)
        .bind(&key.language)
        .bind(&key.model)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        payload
            .map(|json| serde_json::from_str(&json).map_err(store_err))
            .transpose()
    }

    async fn save(&self, key: &ProgressKey, progress: &ChunkProgress) -> Result<()> {
        let payload = serde_json::to_string(progress).map_err(store_err)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO chunk_progress (analysis_id, language, model, completed_chunks, total_chunks, payload_json, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(analysis_id, language, model) DO UPDATE SET
                completed_chunks = excluded.completed_chunks,
                total_chunks = excluded.total_chunks,
                payload_json = excluded.payload_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key.analysis_id)
        .bind(&key.language)
        .bind(&key.model)
        .bind(progress.completed_chunks as i64)
        .bind(progress.total_chunks as i64)
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn delete(&self, key: &ProgressKey) -> Result<()> {
        sqlx::query(
            "DELETE FROM chunk_progress WHERE analysis_id = ? AND language = ? AND model = ?",
        )
        .bind(&key.analysis_id)
        .bind(&key.language)
        .bind(&key.model)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}
