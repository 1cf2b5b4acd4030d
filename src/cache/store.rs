//! Key/value storage behind the response cache
//!
//! The cache manager owns compression, serialization and expiry; a store
//! only keeps opaque entries. [`MemoryStore`] is the default and evicts the
//! oldest entry once `max_entries` is reached.

use crate::cache::CacheError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One stored cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub compressed_payload: Vec<u8>,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Returns whether an entry was removed
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, (CacheEntry, u64)>,
    // Insertion order with the generation each key was written at; entries
    // whose generation no longer matches are stale and skipped.
    order: VecDeque<(String, u64)>,
    next_generation: u64,
}

impl Inner {
    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((key, generation)) = self.order.pop_front() {
            let current = self.entries.get(&key).map(|(_, g)| *g);
            if current == Some(generation) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, generation)| entries.get(key).map(|(_, g)| g) == Some(generation));
    }
}

/// In-process store bounded by entry count
pub struct MemoryStore {
    max_entries: usize,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let inner = self.inner.read().await;
        Ok(inner.entries.get(key).map(|(entry, _)| entry.clone()))
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;

        if !inner.entries.contains_key(&entry.key) && inner.entries.len() >= self.max_entries {
            if let Some(evicted) = inner.evict_oldest() {
                tracing::debug!(key = %evicted, "Evicted oldest cache entry");
            }
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.order.push_back((entry.key.clone(), generation));
        inner.entries.insert(entry.key.clone(), (entry, generation));

        if inner.order.len() > self.max_entries.saturating_mul(2) {
            inner.compact_order();
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut inner = self.inner.write().await;
        Ok(inner.entries.remove(key).is_some())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.inner.read().await.entries.len())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.order.clear();
        Ok(())
    }
}
