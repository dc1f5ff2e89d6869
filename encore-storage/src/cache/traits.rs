//! Byte cache trait and cacheable entity marker.
//!
//! Backends store opaque bytes under namespaced string keys with a TTL.
//! Serialization lives in the cache-aside layer so a backend never needs to
//! know about catalog types.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use encore_core::{CatalogItem, ItemId, StoreResult};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for rows that can be cached.
///
/// - `entity_id()` must return the id the row was requested by
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned` for cache storage
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the unique identifier for this entity.
    fn entity_id(&self) -> ItemId;
}

impl CacheableEntity for CatalogItem {
    fn entity_id(&self) -> ItemId {
        self.id
    }
}

/// Cache backend trait for pluggable cache implementations.
///
/// A miss is `Ok(None)`; `Err` means the cache itself is unhealthy and the
/// caller should fall back to the source of truth.
#[async_trait]
pub trait ByteCache: Send + Sync {
    /// Get a value from the cache.
    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Put a value into the cache, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> StoreResult<()>;

    /// Delete a value. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> StoreResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
