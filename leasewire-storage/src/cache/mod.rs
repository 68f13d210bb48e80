//! Two-tier cache with explicit read provenance.
//!
//! Reads consult the memory tier, then the durable tier, then the caller's
//! fetch function. Every read returns a [`CacheRead<T>`] saying which of
//! those answered, so callers can tell a fresh value from a stale fallback.
//!
//! # Example
//!
//! ```ignore
//! let cache = TwoTierCache::new(durable, clock, CacheConfig::default());
//!
//! let read = cache
//!     .get_or_fetch(&key, Ttl::minutes(10), || api.overdue_payments())
//!     .await?;
//!
//! if read.is_stale() {
//!     tracing::warn!(key = %key, "Showing cached data");
//! }
//! ```

pub mod encoding;
pub mod in_memory;
pub mod lmdb_backend;
pub mod memory;
pub mod read;
pub mod traits;
pub mod two_tier;

pub use in_memory::InMemoryDurableTier;
pub use lmdb_backend::LmdbDurableTier;
pub use memory::MemoryTier;
pub use read::{CacheRead, ReadSource};
pub use traits::{CacheStats, Cacheable, DurableTier};
pub use two_tier::{CacheConfig, TwoTierCache};
