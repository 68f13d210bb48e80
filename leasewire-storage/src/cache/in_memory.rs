//! Durable tier held in process memory.
//!
//! Nothing survives a restart. Used for tests and ephemeral sessions where
//! no cache directory is configured.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use leasewire_core::{CacheKey, StorageError};

use super::traits::DurableTier;

#[derive(Debug, Default)]
pub struct InMemoryDurableTier {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryDurableTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DurableTier for InMemoryDurableTier {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key.as_str()).cloned())
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key.as_str()).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        let doomed: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    async fn len(&self) -> Result<u64, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.len() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
