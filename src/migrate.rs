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

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Upload ledger, one row per distinct content hash
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            dest_dir TEXT NOT NULL,
            doc_name TEXT NOT NULL,
            doc_hash TEXT NOT NULL UNIQUE,
            doc_size INTEGER NOT NULL,
            create_time INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector collection, one row per fingerprint
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            collection TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            content TEXT NOT NULL,
            doc_name TEXT NOT NULL,
            posix TEXT NOT NULL,
            uri TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_create_time ON documents(create_time DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
