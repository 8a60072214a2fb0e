use anyhow::Result;
use sqlx::SqlitePool;

pub async fn create_chunk_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_records (
            identity TEXT NOT NULL,
            start_group_key INTEGER NOT NULL,
            start_sequence_key TEXT NOT NULL,
            end_group_key INTEGER NOT NULL,
            end_sequence_key TEXT NOT NULL,
            structured_text TEXT NOT NULL,
            display_text TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'generated',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (start_group_key, start_sequence_key, end_group_key, end_sequence_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_records_start \
         ON chunk_records(start_group_key, start_sequence_key)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_explanation_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS explanations (
            item_key TEXT PRIMARY KEY,
            group_key INTEGER NOT NULL,
            sequence_key TEXT NOT NULL,
            text TEXT NOT NULL,
            explanation TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'generated',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
