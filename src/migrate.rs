use anyhow::Result;
use sqlx::SqlitePool;

/// Create the checkpoint schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_progress (
            analysis_id TEXT NOT NULL,
            language TEXT NOT NULL,
            model TEXT NOT NULL,
            completed_chunks INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            payload_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (analysis_id, language, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_progress_updated_at ON chunk_progress(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
