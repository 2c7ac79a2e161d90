//! Cache-first recognition.
//!
//! A [`Recognizer`] turns raw sheet bytes into an [`ImportPayload`]. The
//! [`RecognitionRunner`] consults the [`ResultCache`] before invoking it and
//! bounds each invocation with a timeout. Cache reads and writes are not
//! bounded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ffm_core::cache_key::{CacheKey, CacheParams};
use ffm_core::payload::ImportPayload;
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, warn};

use crate::cache::{build_key, ResultCache};
use crate::config::RecognitionConfig;
use crate::error::{Result, StoreError};

#[async_trait]
pub trait Recognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Parameters that change the output. They are part of the cache key.
    fn params(&self) -> CacheParams;

    async fn recognize(&self, raw: &[u8]) -> anyhow::Result<ImportPayload>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

#[derive(Debug, Clone)]
pub struct Recognition {
    pub key: CacheKey,
    pub payload: ImportPayload,
    pub outcome: CacheOutcome,
}

pub struct RecognitionRunner {
    cache: ResultCache,
    recognizer: Arc<dyn Recognizer>,
    timeout: Duration,
}

impl RecognitionRunner {
    pub fn new(cache: ResultCache, recognizer: Arc<dyn Recognizer>, timeout: Duration) -> Self {
        Self {
            cache,
            recognizer,
            timeout,
        }
    }

    pub fn from_config(
        pool: SqlitePool,
        recognizer: Arc<dyn Recognizer>,
        config: &RecognitionConfig,
    ) -> Self {
        Self::new(
            ResultCache::new(pool),
            recognizer,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Return the cached payload for `raw`, or recognize and cache it.
    pub async fn run(&self, raw: &[u8]) -> Result<Recognition> {
        let params = self.recognizer.params();
        let key = build_key(raw, &params);

        if let Some(entry) = self.cache.get(&key).await? {
            match entry.result::<ImportPayload>() {
                Ok(payload) => {
                    info!(key = %key, recognizer = self.recognizer.name(), "recognition cache hit");
                    return Ok(Recognition {
                        key,
                        payload,
                        outcome: CacheOutcome::Hit,
                    });
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "unreadable cache entry, recognizing again");
                }
            }
        }

        debug!(key = %key, recognizer = self.recognizer.name(), "invoking recognizer");
        let payload = tokio::time::timeout(self.timeout, self.recognizer.recognize(raw))
            .await
            .map_err(|_| StoreError::RecognitionTimeout {
                recognizer: self.recognizer.name().to_string(),
                timeout_secs: self.timeout.as_secs(),
            })??;

        self.cache.put(&key, &params, &payload).await?;
        info!(key = %key, products = payload.products.len(), "recognition cached");

        Ok(Recognition {
            key,
            payload,
            outcome: CacheOutcome::Miss,
        })
    }
}

/// Reads bytes that already are an import payload in JSON form.
pub struct JsonPayloadRecognizer;

#[async_trait]
impl Recognizer for JsonPayloadRecognizer {
    fn name(&self) -> &str {
        "json"
    }

    fn params(&self) -> CacheParams {
        CacheParams::from([
            ("engine".to_string(), json!("json")),
            ("payload_version".to_string(), json!("1.0")),
        ])
    }

    async fn recognize(&self, raw: &[u8]) -> anyhow::Result<ImportPayload> {
        Ok(serde_json::from_slice(raw)?)
    }
}
