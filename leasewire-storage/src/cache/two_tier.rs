//! Two-tier read-through cache.
//!
//! Lookup order is memory tier, durable tier, then the caller's fetch
//! function. Each public call samples the clock once and makes every
//! validity decision against that instant.
//!
//! Every invalidation advances a generation for the keys it covers. A
//! writer that captured the generation before a slow fetch can ask for its
//! result to be dropped when an invalidation landed in between.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use dashmap::DashMap;
use leasewire_core::{CacheEntry, CacheKey, Clock, FetchError, KeyPattern, Timestamp, Ttl};

use super::encoding;
use super::memory::{MemoryLookup, MemoryTier};
use super::read::{CacheRead, ReadSource};
use super::traits::{CacheStats, Cacheable, DurableTier};

/// Configuration for the two-tier cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Upper bound on how long a value stays in the memory tier.
    pub memory_ttl: Ttl,
    /// TTL used by callers that do not pass one.
    pub default_ttl: Ttl,
    /// How long an expired durable entry is kept as a stale fallback.
    pub stale_retention: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl: Ttl::seconds(30),
            default_ttl: Ttl::minutes(10),
            stale_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_ttl(mut self, ttl: Ttl) -> Self {
        self.memory_ttl = ttl;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Ttl) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_stale_retention(mut self, retention: Duration) -> Self {
        self.stale_retention = retention;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    evictions: AtomicU64,
    corrupted: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum DurableLookup<T> {
    Valid(CacheEntry<T>),
    /// Expired but inside the retention window.
    Expired(CacheEntry<T>),
    Absent,
}

enum Lookup<T> {
    Hit(CacheRead<T>),
    Miss { stale: Option<CacheEntry<T>> },
}

/// Memory tier in front of a durable tier.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct TwoTierCache {
    memory: MemoryTier,
    durable: Arc<dyn DurableTier>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    counters: Counters,
    invalidations: AtomicU64,
    key_generations: DashMap<CacheKey, u64>,
    prefix_generations: DashMap<String, u64>,
}

impl std::fmt::Debug for TwoTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierCache")
            .field("memory", &self.memory)
            .field("durable", &self.durable.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

impl TwoTierCache {
    pub fn new(durable: Arc<dyn DurableTier>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            memory: MemoryTier::new(),
            durable,
            clock,
            config,
            counters: Counters::default(),
            invalidations: AtomicU64::new(0),
            key_generations: DashMap::new(),
            prefix_generations: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Valid cached value for `key`, or `None` (MISS).
    ///
    /// Expired durable entries inside the retention window still report
    /// MISS; they are only served through [`Self::stale_or`].
    pub async fn get<T: Cacheable>(&self, key: &CacheKey) -> Option<CacheRead<T>> {
        let now = self.clock.now();
        match self.lookup(key, now).await {
            Lookup::Hit(read) => Some(read),
            Lookup::Miss { .. } => None,
        }
    }

    /// Write `value` to both tiers and return the shared snapshot.
    pub async fn set<T: Cacheable>(&self, key: &CacheKey, value: T, ttl: Ttl) -> Arc<T> {
        let now = self.clock.now();
        self.store(key, Arc::new(value), now, ttl).await
    }

    /// Invalidation generation covering `key`. Changes whenever `key`, or a
    /// prefix matching it, is invalidated.
    pub fn generation(&self, key: &CacheKey) -> u64 {
        let own = self.key_generations.get(key).map_or(0, |entry| *entry.value());
        self.prefix_generations
            .iter()
            .filter(|entry| key.as_str().starts_with(entry.key().as_str()))
            .map(|entry| *entry.value())
            .fold(own, u64::max)
    }

    /// Write `value` unless `key` was invalidated since `generation` was
    /// taken. Returns whether the value stayed cached.
    pub async fn set_unless_invalidated<T: Cacheable>(
        &self,
        key: &CacheKey,
        value: Arc<T>,
        ttl: Ttl,
        generation: u64,
    ) -> bool {
        let now = self.clock.now();
        self.store_if_current(key, value, now, ttl, generation).await
    }

    /// Read through the cache, calling `fetch` on a miss.
    ///
    /// A failed fetch is answered with the last durable value when one is
    /// retained, otherwise the error propagates. A cancelled fetch always
    /// propagates and writes nothing.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        fetch: F,
    ) -> Result<CacheRead<T>, FetchError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let now = self.clock.now();
        let generation = self.generation(key);
        let stale = match self.lookup(key, now).await {
            Lookup::Hit(read) => return Ok(read),
            Lookup::Miss { stale } => stale,
        };

        match fetch().await {
            Ok(value) => {
                let value = Arc::new(value);
                self.store_if_current(key, Arc::clone(&value), now, ttl, generation)
                    .await;
                Ok(CacheRead::new(value, ReadSource::Fetched, now))
            }
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => self.serve_stale(key, stale, err),
        }
    }

    /// Answer a failed refresh with the retained durable value for `key`.
    pub async fn stale_or<T: Cacheable>(
        &self,
        key: &CacheKey,
        err: FetchError,
    ) -> Result<CacheRead<T>, FetchError> {
        if err.is_cancelled() {
            return Err(err);
        }
        let now = self.clock.now();
        let stale = match self.durable_lookup::<T>(key, now).await {
            DurableLookup::Valid(entry) | DurableLookup::Expired(entry) => Some(entry),
            DurableLookup::Absent => None,
        };
        self.serve_stale(key, stale, err)
    }

    /// When the entry under `key` was written, valid or not.
    pub async fn created_at(&self, key: &CacheKey) -> Option<Timestamp> {
        let now = self.clock.now();
        if let Some(created_at) = self.memory.created_at(key, now) {
            return Some(created_at);
        }
        let bytes = self.durable.get(key).await.ok().flatten()?;
        encoding::decode_header(key, &bytes)
            .ok()
            .map(|header| header.created_at)
    }

    /// Remove `key` from both tiers. Returns whether either tier held it.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        let generation = self.next_generation();
        self.key_generations.insert(key.clone(), generation);
        let in_memory = self.memory.remove(key);
        let in_durable = self.delete_durable(key).await;
        tracing::debug!(key = %key, in_memory, in_durable, "Invalidated cache key");
        in_memory || in_durable
    }

    /// Remove every key starting with `prefix` from both tiers.
    ///
    /// Returns the number of durable entries removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        let generation = self.next_generation();
        self.prefix_generations.insert(prefix.to_string(), generation);
        let from_memory = self.memory.remove_matching(&KeyPattern::prefix(prefix));
        let from_durable = match self.durable.delete_prefix(prefix).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "Durable prefix invalidation failed");
                0
            }
        };
        tracing::debug!(prefix, from_memory, from_durable, "Invalidated cache prefix");
        from_durable
    }

    pub async fn invalidate_pattern(&self, pattern: &KeyPattern) -> u64 {
        match pattern {
            KeyPattern::Exact(key) => u64::from(self.invalidate(key).await),
            KeyPattern::Prefix(prefix) => self.invalidate_prefix(prefix).await,
        }
    }

    /// Drop the memory tier, keeping durable entries. Used on session reset.
    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            corrupted: self.counters.corrupted.load(Ordering::Relaxed),
            memory_entries: self.memory.len() as u64,
        }
    }

    async fn lookup<T: Cacheable>(&self, key: &CacheKey, now: Timestamp) -> Lookup<T> {
        match self.memory.get::<T>(key, now) {
            MemoryLookup::Hit(hit) => {
                Counters::bump(&self.counters.memory_hits);
                return Lookup::Hit(CacheRead::new(hit.value, ReadSource::Memory, hit.created_at));
            }
            MemoryLookup::Expired => Counters::bump(&self.counters.evictions),
            MemoryLookup::Absent => {}
        }

        match self.durable_lookup::<T>(key, now).await {
            DurableLookup::Valid(entry) => {
                Counters::bump(&self.counters.durable_hits);
                let value = Arc::new(entry.value);
                let memory_expiry = self.config.memory_ttl.expires_from(now).min(entry.expires_at);
                self.memory
                    .insert(key.clone(), Arc::clone(&value), entry.created_at, memory_expiry);
                Lookup::Hit(CacheRead::new(value, ReadSource::Durable, entry.created_at))
            }
            DurableLookup::Expired(entry) => {
                Counters::bump(&self.counters.misses);
                Lookup::Miss { stale: Some(entry) }
            }
            DurableLookup::Absent => {
                Counters::bump(&self.counters.misses);
                Lookup::Miss { stale: None }
            }
        }
    }

    async fn durable_lookup<T: Cacheable>(&self, key: &CacheKey, now: Timestamp) -> DurableLookup<T> {
        let bytes = match self.durable.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return DurableLookup::Absent,
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    backend = self.durable.backend_name(),
                    error = %e,
                    "Durable tier read failed, treating as miss"
                );
                return DurableLookup::Absent;
            }
        };

        let entry = match encoding::decode::<T>(key, &bytes) {
            Ok(entry) => entry,
            Err(corruption) => {
                tracing::warn!(error = %corruption, "Dropping corrupted durable entry");
                Counters::bump(&self.counters.corrupted);
                self.delete_durable(key).await;
                return DurableLookup::Absent;
            }
        };

        if entry.is_valid_at(now) {
            DurableLookup::Valid(entry)
        } else if self.within_retention(entry.expires_at, now) {
            DurableLookup::Expired(entry)
        } else {
            Counters::bump(&self.counters.evictions);
            self.delete_durable(key).await;
            DurableLookup::Absent
        }
    }

    fn within_retention(&self, expires_at: Timestamp, now: Timestamp) -> bool {
        TimeDelta::from_std(self.config.stale_retention)
            .ok()
            .and_then(|retention| expires_at.checked_add_signed(retention))
            .map_or(true, |limit| now < limit)
    }

    async fn store<T: Cacheable>(
        &self,
        key: &CacheKey,
        value: Arc<T>,
        created_at: Timestamp,
        ttl: Ttl,
    ) -> Arc<T> {
        let memory_ttl = ttl.min(self.config.memory_ttl);
        self.memory.insert(
            key.clone(),
            Arc::clone(&value),
            created_at,
            memory_ttl.expires_from(created_at),
        );

        let entry = CacheEntry::new(key.clone(), value.as_ref(), created_at, ttl);
        let written = match encoding::encode(&entry) {
            Ok(bytes) => self.durable.put(key, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(
                key = %key,
                backend = self.durable.backend_name(),
                error = %e,
                "Durable tier write failed, value cached in memory only"
            );
        }
        value
    }

    fn next_generation(&self) -> u64 {
        self.invalidations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Invalidations bump the generation before clearing the tiers, so a
    /// write that loses the race is removed by the recheck after it.
    async fn store_if_current<T: Cacheable>(
        &self,
        key: &CacheKey,
        value: Arc<T>,
        created_at: Timestamp,
        ttl: Ttl,
        generation: u64,
    ) -> bool {
        if self.generation(key) != generation {
            tracing::debug!(key = %key, "Key invalidated during fetch, not caching result");
            return false;
        }
        self.store(key, value, created_at, ttl).await;
        if self.generation(key) != generation {
            self.memory.remove(key);
            self.delete_durable(key).await;
            tracing::debug!(key = %key, "Key invalidated during write, dropped result");
            return false;
        }
        true
    }

    async fn delete_durable(&self, key: &CacheKey) -> bool {
        match self.durable.delete(key).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Durable tier delete failed");
                false
            }
        }
    }

    fn serve_stale<T>(
        &self,
        key: &CacheKey,
        stale: Option<CacheEntry<T>>,
        err: FetchError,
    ) -> Result<CacheRead<T>, FetchError> {
        match stale {
            Some(entry) => {
                tracing::warn!(
                    key = %key,
                    error = %err,
                    cached_at = %entry.created_at,
                    "Fetch failed, serving stale value"
                );
                Counters::bump(&self.counters.stale_served);
                Ok(CacheRead::new(
                    Arc::new(entry.value),
                    ReadSource::Stale,
                    entry.created_at,
                ))
            }
            None => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::in_memory::InMemoryDurableTier;
    use leasewire_core::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn setup() -> (TwoTierCache, ManualClock, Arc<InMemoryDurableTier>) {
        let clock = ManualClock::starting_now();
        let durable = Arc::new(InMemoryDurableTier::new());
        let cache = TwoTierCache::new(
            durable.clone(),
            Arc::new(clock.clone()),
            CacheConfig::default(),
        );
        (cache, clock, durable)
    }

    fn network_error(key: &str) -> FetchError {
        FetchError::Network {
            key: key.to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_precedence_follows_clock() {
        let (cache, clock, _) = setup();
        let key = CacheKey::new("payments:overdue");
        cache.set(&key, vec![1u32, 2], Ttl::seconds(60)).await;

        clock.advance(secs(10));
        let read = cache.get::<Vec<u32>>(&key).await.unwrap();
        assert_eq!(read.source(), ReadSource::Memory);

        clock.advance(secs(30));
        let read = cache.get::<Vec<u32>>(&key).await.unwrap();
        assert_eq!(read.source(), ReadSource::Durable);
        assert_eq!(read.value(), &vec![1, 2]);

        clock.advance(secs(21));
        assert!(cache.get::<Vec<u32>>(&key).await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.durable_hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_memory_ttl_capped_by_entry_ttl() {
        let (cache, clock, _) = setup();
        let key = CacheKey::new("messages:inbox");
        cache.set(&key, 5u8, Ttl::seconds(10)).await;

        clock.advance(secs(10));
        assert!(cache.get::<u8>(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_get_or_fetch_fetches_once_then_hits() {
        let (cache, _, _) = setup();
        let key = CacheKey::new("payments:summary");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let read = cache
                .get_or_fetch(&key, Ttl::minutes(10), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FetchError>("summary".to_string())
                })
                .await
                .unwrap();
            assert_eq!(read.value(), "summary");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_serves_stale() {
        let (cache, clock, _) = setup();
        let key = CacheKey::new("maintenance:open");
        cache.set(&key, 3u64, Ttl::seconds(60)).await;
        clock.advance(secs(120));

        let read = cache
            .get_or_fetch(&key, Ttl::seconds(60), || async {
                Err::<u64, _>(network_error("maintenance:open"))
            })
            .await
            .unwrap();
        assert!(read.is_stale());
        assert_eq!(*read.value(), 3);
        assert_eq!(cache.stats().stale_served, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_without_stale_propagates() {
        let (cache, _, _) = setup();
        let key = CacheKey::new("maintenance:open");

        let err = cache
            .get_or_fetch(&key, Ttl::seconds(60), || async {
                Err::<u64, _>(network_error("maintenance:open"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_fetch_skips_fallback_and_write() {
        let (cache, clock, _) = setup();
        let key = CacheKey::new("payments:overdue");
        cache.set(&key, 1u8, Ttl::seconds(60)).await;
        clock.advance(secs(61));

        let err = cache
            .get_or_fetch(&key, Ttl::seconds(60), || async {
                Err::<u8, _>(FetchError::Cancelled {
                    key: "payments:overdue".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(cache.stats().stale_served, 0);

        let err = cache
            .stale_or::<u8>(&key, FetchError::Cancelled { key: key.to_string() })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_retention_window_evicts() {
        let (cache, clock, durable) = setup();
        let key = CacheKey::new("payments:summary");
        cache.set(&key, 9u8, Ttl::seconds(60)).await;
        clock.advance(secs(60 + 24 * 60 * 60));

        let err = cache
            .get_or_fetch(&key, Ttl::seconds(60), || async {
                Err::<u8, _>(network_error("payments:summary"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
        assert!(!durable.contains("payments:summary"));
        assert!(cache.stats().evictions >= 1);
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_a_miss_and_deleted() {
        let (cache, _, durable) = setup();
        let key = CacheKey::new("messages:inbox");
        durable.put(&key, b"not json".to_vec()).await.unwrap();

        assert!(cache.get::<String>(&key).await.is_none());
        assert!(!durable.contains("messages:inbox"));
        assert_eq!(cache.stats().corrupted, 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_in_durable_is_corruption() {
        let (cache, _, durable) = setup();
        let key = CacheKey::new("messages:inbox");
        cache.set(&key, "text".to_string(), Ttl::seconds(60)).await;
        cache.clear_memory();

        assert!(cache.get::<Vec<u64>>(&key).await.is_none());
        assert!(!durable.contains("messages:inbox"));
    }

    #[tokio::test]
    async fn test_prefix_invalidation_clears_both_tiers() {
        let (cache, _, durable) = setup();
        for key in ["payments:overdue", "payments:pay-1", "messages:inbox"] {
            cache.set(&CacheKey::new(key), 1u8, Ttl::seconds(60)).await;
        }

        let removed = cache.invalidate_pattern(&KeyPattern::parse("payments:*")).await;
        assert_eq!(removed, 2);
        assert!(cache.get::<u8>(&CacheKey::new("payments:overdue")).await.is_none());
        assert!(cache.get::<u8>(&CacheKey::new("messages:inbox")).await.is_some());
        assert!(!durable.contains("payments:pay-1"));
    }

    #[tokio::test]
    async fn test_invalidated_key_is_not_served_stale() {
        let (cache, _, _) = setup();
        let key = CacheKey::new("payments:overdue");
        cache.set(&key, 1u8, Ttl::seconds(60)).await;
        assert!(cache.invalidate(&key).await);

        let err = cache.stale_or::<u8>(&key, network_error("payments:overdue")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_durable_survives_memory_reset() {
        let (cache, clock, durable) = setup();
        let key = CacheKey::new("maintenance:urgent");
        cache.set(&key, vec!["mr-1".to_string()], Ttl::minutes(10)).await;

        let restarted = TwoTierCache::new(durable, Arc::new(clock.clone()), CacheConfig::default());
        let read = restarted.get::<Vec<String>>(&key).await.unwrap();
        assert_eq!(read.source(), ReadSource::Durable);
        assert_eq!(restarted.created_at(&key).await, Some(read.cached_at()));
    }

    #[tokio::test]
    async fn test_write_after_invalidation_is_dropped() {
        let (cache, _, durable) = setup();
        let key = CacheKey::new("payments:overdue");
        let before = cache.generation(&key);

        cache.invalidate_prefix("payments:").await;
        assert_ne!(cache.generation(&key), before);
        assert_eq!(cache.generation(&CacheKey::new("messages:inbox")), 0);

        let kept = cache
            .set_unless_invalidated(&key, Arc::new(1u8), Ttl::seconds(60), before)
            .await;
        assert!(!kept);
        assert!(cache.get::<u8>(&key).await.is_none());
        assert!(!durable.contains("payments:overdue"));

        let current = cache.generation(&key);
        assert!(
            cache
                .set_unless_invalidated(&key, Arc::new(2u8), Ttl::seconds(60), current)
                .await
        );
        assert_eq!(*cache.get::<u8>(&key).await.unwrap().value(), 2);
    }

    #[tokio::test]
    async fn test_fetch_racing_invalidation_is_not_cached() {
        let (cache, _, _) = setup();
        let key = CacheKey::new("maintenance:open");

        let read = cache
            .get_or_fetch(&key, Ttl::seconds(60), || async {
                cache.invalidate(&key).await;
                Ok::<_, FetchError>(7u32)
            })
            .await
            .unwrap();
        assert_eq!(read.source(), ReadSource::Fetched);
        assert_eq!(*read.value(), 7);
        assert!(cache.get::<u32>(&key).await.is_none());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        #[test]
        fn prop_value_lives_exactly_its_ttl(ttl_secs in 1u64..600, elapsed in 0u64..1200) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let (cache, clock, _) = setup();
            let key = CacheKey::new("payments:summary");

            let read = runtime.block_on(async {
                cache.set(&key, ttl_secs, Ttl::seconds(ttl_secs)).await;
                clock.advance(secs(elapsed));
                cache.get::<u64>(&key).await
            });
            if elapsed < ttl_secs {
                let read = read.unwrap();
                proptest::prop_assert_eq!(*read.value(), ttl_secs);
            } else {
                proptest::prop_assert!(read.is_none());
            }
        }
    }
}
