//! In-process memory tier.
//!
//! Values are held type-erased as `Arc<dyn Any>` so one map serves every
//! resource type. A read with the wrong type parameter is a miss.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use leasewire_core::{CacheKey, KeyPattern, Timestamp};

#[derive(Clone)]
struct Slot {
    value: Arc<dyn Any + Send + Sync>,
    created_at: Timestamp,
    expires_at: Timestamp,
}

/// A value read from the memory tier.
#[derive(Debug)]
pub struct MemoryHit<T> {
    pub value: Arc<T>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Outcome of a memory tier lookup.
#[derive(Debug)]
pub enum MemoryLookup<T> {
    Hit(MemoryHit<T>),
    /// Present but expired; the slot has been removed.
    Expired,
    Absent,
}

#[derive(Default)]
pub struct MemoryTier {
    slots: DashMap<CacheKey, Slot>,
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("entries", &self.slots.len())
            .finish()
    }
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` as of `now`, evicting the slot if it has expired.
    pub fn get<T: Send + Sync + 'static>(&self, key: &CacheKey, now: Timestamp) -> MemoryLookup<T> {
        let Some(slot) = self.slots.get(key).map(|slot| slot.clone()) else {
            return MemoryLookup::Absent;
        };

        if now >= slot.expires_at {
            self.slots.remove_if(key, |_, current| current.expires_at == slot.expires_at);
            return MemoryLookup::Expired;
        }

        match slot.value.downcast::<T>() {
            Ok(value) => MemoryLookup::Hit(MemoryHit {
                value,
                created_at: slot.created_at,
                expires_at: slot.expires_at,
            }),
            Err(_) => {
                tracing::debug!(key = %key, "Memory tier type mismatch, treating as miss");
                MemoryLookup::Absent
            }
        }
    }

    pub fn insert<T: Send + Sync + 'static>(
        &self,
        key: CacheKey,
        value: Arc<T>,
        created_at: Timestamp,
        expires_at: Timestamp,
    ) {
        self.slots.insert(
            key,
            Slot {
                value,
                created_at,
                expires_at,
            },
        );
    }

    /// Write time of the entry under `key`, if still valid at `now`.
    pub fn created_at(&self, key: &CacheKey, now: Timestamp) -> Option<Timestamp> {
        self.slots
            .get(key)
            .filter(|slot| now < slot.expires_at)
            .map(|slot| slot.created_at)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Remove every key matching `pattern`. Returns the number removed.
    pub fn remove_matching(&self, pattern: &KeyPattern) -> u64 {
        match pattern {
            KeyPattern::Exact(key) => u64::from(self.remove(key)),
            KeyPattern::Prefix(_) => {
                let before = self.slots.len();
                self.slots.retain(|key, _| !pattern.matches(key.as_str()));
                before.saturating_sub(self.slots.len()) as u64
            }
        }
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    #[test]
    fn test_hit_then_expired() {
        let tier = MemoryTier::new();
        let key = CacheKey::new("messages:inbox");
        let now = Utc::now();
        tier.insert(key.clone(), Arc::new(7u32), now, now + TimeDelta::seconds(30));

        match tier.get::<u32>(&key, now + TimeDelta::seconds(29)) {
            MemoryLookup::Hit(hit) => assert_eq!(*hit.value, 7),
            other => panic!("expected hit, got {:?}", other),
        }
        assert!(matches!(
            tier.get::<u32>(&key, now + TimeDelta::seconds(30)),
            MemoryLookup::Expired
        ));
        assert!(tier.is_empty());
    }

    #[test]
    fn test_wrong_type_is_a_miss() {
        let tier = MemoryTier::new();
        let key = CacheKey::new("payments:summary");
        let now = Utc::now();
        tier.insert(key.clone(), Arc::new("text".to_string()), now, now + TimeDelta::seconds(30));

        assert!(matches!(tier.get::<u64>(&key, now), MemoryLookup::Absent));
        assert!(matches!(tier.get::<String>(&key, now), MemoryLookup::Hit(_)));
    }

    #[test]
    fn test_prefix_removal() {
        let tier = MemoryTier::new();
        let now = Utc::now();
        let later = now + TimeDelta::seconds(30);
        for key in ["payments:overdue", "payments:summary", "messages:inbox"] {
            tier.insert(CacheKey::new(key), Arc::new(1u8), now, later);
        }

        assert_eq!(tier.remove_matching(&KeyPattern::parse("payments:*")), 2);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.remove_matching(&KeyPattern::parse("messages:inbox")), 1);
    }
}
