//! Durable tier trait and cacheable value marker.

use async_trait::async_trait;
use leasewire_core::{CacheKey, StorageError};
use serde::{de::DeserializeOwned, Serialize};

/// Marker trait for values that can live in both cache tiers.
///
/// The memory tier keeps values as shared `Arc<T>` snapshots; the durable
/// tier stores them as JSON.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Durable key-value backend for serialized cache entries.
///
/// Backends store opaque bytes; expiry and decoding are handled by the
/// cache. Implementations must be safe for concurrent use.
#[async_trait]
pub trait DurableTier: Send + Sync + 'static {
    /// Raw bytes stored under `key`.
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `bytes` under `key`, replacing any previous value.
    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Remove `key`. Returns whether an entry was present.
    async fn delete(&self, key: &CacheKey) -> Result<bool, StorageError>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<u64, StorageError>;

    /// Name used in log lines.
    fn backend_name(&self) -> &'static str;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered by the memory tier.
    pub memory_hits: u64,
    /// Reads answered by the durable tier.
    pub durable_hits: u64,
    /// Reads neither tier could answer.
    pub misses: u64,
    /// Fetch failures answered with an expired durable value.
    pub stale_served: u64,
    /// Expired entries removed at read time.
    pub evictions: u64,
    /// Durable entries dropped because they failed to decode.
    pub corrupted: u64,
    /// Entries currently in the memory tier.
    pub memory_entries: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.durable_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            memory_hits: 60,
            durable_hits: 20,
            misses: 20,
            ..Default::default()
        };
        assert_eq!(stats.hits(), 80);
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    fn assert_cacheable<T: Cacheable>() {}

    #[test]
    fn test_json_values_and_collections_are_cacheable() {
        assert_cacheable::<serde_json::Value>();
        assert_cacheable::<Vec<String>>();
        assert_cacheable::<std::collections::BTreeMap<String, u64>>();
    }
}
