//! Idempotent schema creation for the knowledge index and the cache.

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};

use crate::config::Config;
use crate::db;

/// Create both databases named in the config. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let index = db::connect(&config.knowledge.index_path).await?;
    create_index_schema(&mut *index.acquire().await?).await?;
    index.close().await;

    let cache = db::connect(&config.cache.db_path).await?;
    create_cache_schema(&cache).await?;
    cache.close().await;

    Ok(())
}

/// Takes a connection so callers can run it inside a transaction.
pub async fn create_index_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kb_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            source TEXT NOT NULL DEFAULT '',
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_chunks_source ON kb_chunks(source)")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn drop_index_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("DROP TABLE IF EXISTS kb_chunks")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn create_cache_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            timestamp REAL NOT NULL,
            ttl INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_entries_timestamp ON cache_entries(timestamp)")
        .execute(pool)
        .await?;

    Ok(())
}
