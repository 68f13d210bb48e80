//! Leasewire Storage - Two-Tier Cache
//!
//! A fast in-process memory tier in front of a slower durable tier that
//! survives restarts. The durable tier is pluggable: LMDB on disk for the
//! daemon, an in-memory map for tests and ephemeral sessions.

pub mod cache;

pub use cache::{
    CacheConfig, CacheRead, CacheStats, Cacheable, DurableTier, InMemoryDurableTier,
    LmdbDurableTier, MemoryTier, ReadSource, TwoTierCache,
};
