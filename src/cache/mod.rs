//! Response cache
//!
//! Completions are cached under a key derived from the normalized prompt,
//! task type and model, so logically identical requests share an entry.
//! Values are JSON-encoded and zstd-compressed before they reach the store;
//! an expired entry reads as a miss and is removed.

pub mod compression;
pub mod store;
pub mod warmer;

pub use compression::CompressionError;
pub use store::{CacheEntry, CacheStore, MemoryStore};
pub use warmer::{CacheWarmer, WARMER_TENANT, WarmReport};

use crate::config::CacheConfig;
use crate::gateway::TaskType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("cache payload encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache store error: {0}")]
    Store(String),
}

/// A cached upstream completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCompletion {
    pub text: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate_percent: f64,
}

/// Trim, collapse internal whitespace and lowercase
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 hex key over the normalized prompt, task type and model
pub fn cache_key(prompt: &str, task_type: TaskType, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_prompt(prompt).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(task_type.as_str().as_bytes());
    hasher.update(b"\x1f");
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    default_ttl: Duration,
    compression_level: i32,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheManager {
    /// Cache backed by an in-memory store sized from the config
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new(config.max_entries)))
    }

    pub fn with_store(config: &CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            enabled: config.enabled,
            default_ttl: config.ttl(),
            compression_level: config.compression_level,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a completion; `Ok(None)` on miss, expiry, or a disabled cache
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails or the entry cannot be decoded.
    /// Undecodable entries are removed.
    pub async fn get(&self, key: &str) -> Result<Option<CachedCompletion>, CacheError> {
        if !self.enabled {
            return Ok(None);
        }

        let entry = match self.store.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        if entry.is_expired_at(Instant::now()) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.store.remove(key).await?;
            tracing::debug!(key = %key, "Cache entry expired");
            return Ok(None);
        }

        match decode(&entry.compressed_payload) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Dropping unreadable cache entry");
                self.store.remove(key).await?;
                Err(e)
            }
        }
    }

    /// Store a completion for `ttl`
    pub async fn set(
        &self,
        key: &str,
        value: &CachedCompletion,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let json = serde_json::to_vec(value)?;
        let compressed_payload = compression::compress(&json, self.compression_level)?;
        tracing::debug!(
            key = %key,
            raw_bytes = json.len(),
            compressed_bytes = compressed_payload.len(),
            "Caching completion"
        );

        self.store
            .set(CacheEntry {
                key: key.to_string(),
                compressed_payload,
                created_at: Instant::now(),
                ttl,
            })
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        self.store.remove(key).await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.store.clear().await
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            enabled: self.enabled,
            entries: self.store.len().await.unwrap_or(0),
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate_percent: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64 * 100.0
            },
        }
    }
}

fn decode(payload: &[u8]) -> Result<CachedCompletion, CacheError> {
    let json = compression::decompress(payload)?;
    Ok(serde_json::from_slice(&json)?)
}
