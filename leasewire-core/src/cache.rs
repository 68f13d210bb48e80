//! Cache vocabulary: keys, patterns, TTLs and entries.

use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Time-to-live in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ttl(u64);

impl Ttl {
    pub const fn seconds(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn minutes(mins: u64) -> Self {
        Self(mins * 60)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// `start + ttl`, saturating at the largest representable instant.
    pub fn expires_from(&self, start: Timestamp) -> Timestamp {
        i64::try_from(self.0)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| start.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Colon-separated cache key, e.g. `payments:overdue`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segment before the first `:` (the whole key when there is none).
    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Logical key pattern used for invalidation.
///
/// Written as `payments:overdue` (exact) or `payments:*` (prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPattern {
    Exact(CacheKey),
    Prefix(String),
}

impl KeyPattern {
    pub fn exact(key: impl Into<CacheKey>) -> Self {
        Self::Exact(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Parse the textual form; a trailing `*` makes a prefix pattern.
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(CacheKey::new(pattern)),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => exact.as_str() == key,
            Self::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{}", key),
            Self::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// A cached value with its validity window.
///
/// Invariant: `expires_at = created_at + ttl`; the entry is valid iff
/// `now < expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub value: T,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl<T> CacheEntry<T> {
    pub fn new(key: CacheKey, value: T, created_at: Timestamp, ttl: Ttl) -> Self {
        Self {
            key,
            value,
            created_at,
            expires_at: ttl.expires_from(created_at),
        }
    }

    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    /// Time elapsed since the entry was written, zero if `now` is earlier.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn map<U, F>(self, f: F) -> CacheEntry<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheEntry {
            key: self.key,
            value: f(self.value),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}
