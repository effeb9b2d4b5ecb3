//! Persistent key/value cache with per-entry TTL.
//!
//! Values are stored as JSON text next to the wall-clock time they were
//! written. An entry is expired once `now - timestamp > ttl`. Expired rows
//! are deleted lazily by [`CacheManager::get`] and in bulk by
//! [`CacheManager::cleanup_expired`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::db;
use crate::error::Result;
use crate::migrate;

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: u64,
    pub expired_entries: u64,
    pub active_entries: u64,
    pub db_path: String,
}

pub struct CacheManager {
    pool: SqlitePool,
    db_path: PathBuf,
    default_ttl: u64,
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

impl CacheManager {
    pub async fn open(config: &CacheConfig) -> Result<Self> {
        Self::open_at(&config.db_path, config.default_ttl_secs).await
    }

    pub async fn open_at(db_path: &Path, default_ttl: u64) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::create_cache_schema(&pool).await?;
        debug!(path = %db_path.display(), "cache opened");
        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
            default_ttl,
        })
    }

    /// Insert or overwrite `key`. `ttl` defaults to the configured TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let ttl = i64::try_from(ttl.unwrap_or(self.default_ttl)).unwrap_or(i64::MAX);
        sqlx::query(
            "INSERT INTO cache_entries (key, value, timestamp, ttl) VALUES (?, ?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             timestamp = excluded.timestamp, ttl = excluded.ttl",
        )
        .bind(key)
        .bind(json)
        .bind(now_secs())
        .bind(ttl)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Value for `key`, or `None` if missing or expired. An expired row is
    /// deleted on the way out.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT value, timestamp, ttl FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let timestamp: f64 = row.get("timestamp");
        let ttl: i64 = row.get("ttl");
        if now_secs() - timestamp > ttl as f64 {
            self.delete(key).await?;
            return Ok(None);
        }

        let value: String = row.get("value");
        match serde_json::from_str(&value) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(key, error = %e, "cached value has unexpected shape");
                Err(e.into())
            }
        }
    }

    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Remove `key`. Returns whether a row existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE (? - timestamp) > ttl")
            .bind(now_secs())
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "expired cache entries removed");
        }
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_stats(&self) -> Result<CacheStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        let expired: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE (? - timestamp) > ttl")
                .bind(now_secs())
                .fetch_one(&self.pool)
                .await?;

        let total = total.max(0) as u64;
        let expired = expired.max(0) as u64;
        Ok(CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total.saturating_sub(expired),
            db_path: self.db_path.display().to_string(),
        })
    }
}
