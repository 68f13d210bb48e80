//! Durable entry encoding.
//!
//! Entries are stored as the JSON form of `CacheEntry<T>`. The validity
//! window can be read back without knowing `T`, which lets the cache apply
//! expiry and retention to entries it cannot decode.

use leasewire_core::{CacheCorruptionError, CacheEntry, CacheKey, StorageError, Timestamp};
use serde::Deserialize;

use super::traits::Cacheable;

/// Validity window of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EntryHeader {
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl EntryHeader {
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

pub fn encode<T: Cacheable>(entry: &CacheEntry<&T>) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(entry).map_err(|e| StorageError::Serialization {
        key: entry.key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode<T: Cacheable>(key: &CacheKey, bytes: &[u8]) -> Result<CacheEntry<T>, CacheCorruptionError> {
    serde_json::from_slice(bytes).map_err(|e| CacheCorruptionError {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_header(key: &CacheKey, bytes: &[u8]) -> Result<EntryHeader, CacheCorruptionError> {
    serde_json::from_slice(bytes).map_err(|e| CacheCorruptionError {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
