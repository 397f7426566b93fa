use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Every statement is idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            key TEXT PRIMARY KEY,
            project_key TEXT NOT NULL,
            data_json TEXT NOT NULL,
            hash TEXT NOT NULL,
            collected_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL,
            sent INTEGER NOT NULL DEFAULT 0,
            sent_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            key TEXT PRIMARY KEY,
            data_json TEXT NOT NULL,
            collected_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL,
            sent INTEGER NOT NULL DEFAULT 0,
            sent_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_project_key ON tickets(project_key)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tickets_updated_at ON tickets(project_key, updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
