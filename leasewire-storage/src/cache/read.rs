//! Read results carrying provenance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use leasewire_core::Timestamp;

/// Which layer answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    Memory,
    Durable,
    /// Fetched from the remote query API during this read.
    Fetched,
    /// Expired durable value served because the fetch failed.
    Stale,
}

impl fmt::Display for ReadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Durable => "durable",
            Self::Fetched => "fetched",
            Self::Stale => "stale",
        })
    }
}

/// Result of a cache read.
///
/// The value is an immutable shared snapshot; holding it never blocks
/// writers.
#[derive(Debug)]
pub struct CacheRead<T> {
    value: Arc<T>,
    source: ReadSource,
    cached_at: Timestamp,
}

impl<T> Clone for CacheRead<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            source: self.source,
            cached_at: self.cached_at,
        }
    }
}

impl<T> CacheRead<T> {
    pub fn new(value: Arc<T>, source: ReadSource, cached_at: Timestamp) -> Self {
        Self {
            value,
            source,
            cached_at,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn shared(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }

    pub fn into_shared(self) -> Arc<T> {
        self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// When the value was written to the cache (or fetched).
    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn is_stale(&self) -> bool {
        self.source == ReadSource::Stale
    }

    pub fn was_cache_hit(&self) -> bool {
        matches!(self.source, ReadSource::Memory | ReadSource::Durable)
    }

    /// How old the value is as of `now`, zero if `now` is earlier.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Re-tag the read, e.g. when a coalesced fetch is observed by a waiter.
    pub fn with_source(mut self, source: ReadSource) -> Self {
        self.source = source;
        self
    }
}
