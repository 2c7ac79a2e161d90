//! Recognition result cache.
//!
//! Content-addressed: the key is derived from the raw input bytes and the
//! processing parameters (see [`ffm_core::cache_key`]). Entries are replaced
//! wholesale on `put` and never evicted.

use chrono::Utc;
use ffm_core::cache_key::{CacheKey, CacheParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

use crate::error::{Result, StoreError};

pub use ffm_core::cache_key::build_key;

/// A stored recognition result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub params: CacheParams,
    pub result_json: String,
    /// Unix seconds.
    pub created_at: i64,
}

impl CacheEntry {
    /// Deserialize the stored result.
    pub fn result<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.result_json)?)
    }
}

#[derive(Clone)]
pub struct ResultCache {
    pool: SqlitePool,
}

impl ResultCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a result. A miss is `Ok(None)`.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT created_at, params, result_json FROM recognition_cache WHERE cache_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!(key = %key, "cache miss");
            return Ok(None);
        };

        let params_json: String = row.try_get("params")?;
        let params: CacheParams =
            serde_json::from_str(&params_json).map_err(|e| StoreError::Corrupt {
                table: "recognition_cache",
                detail: format!("params of {}: {}", key, e),
            })?;

        debug!(key = %key, "cache hit");
        Ok(Some(CacheEntry {
            key: key.clone(),
            params,
            result_json: row.try_get("result_json")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    /// Store `result` under `key`, replacing any previous entry.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        params: &CacheParams,
        result: &T,
    ) -> Result<()> {
        let params_json = serde_json::to_string(params)?;
        let result_json = serde_json::to_string(result)?;

        sqlx::query(
            r#"
            INSERT INTO recognition_cache (cache_key, created_at, params, result_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                created_at = excluded.created_at,
                params = excluded.params,
                result_json = excluded.result_json
            "#,
        )
        .bind(key.as_str())
        .bind(Utc::now().timestamp())
        .bind(params_json)
        .bind(result_json)
        .execute(&self.pool)
        .await?;

        debug!(key = %key, "cache put");
        Ok(())
    }

    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recognition_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
