//! LMDB-backed durable tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped store
//! that survives process restarts. Keys are the UTF-8 bytes of the cache
//! key; values are encoded entries from [`super::encoding`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `len`
//! - Write transactions for `put`, `delete` and `delete_prefix`

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use leasewire_core::{CacheKey, StorageError};

use super::traits::DurableTier;

fn txn_error(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

/// LMDB durable tier.
///
/// # Example
///
/// ```ignore
/// let durable = LmdbDurableTier::open("/var/cache/leasewire", 64)?;
/// let cache = TwoTierCache::new(Arc::new(durable), clock, CacheConfig::default());
/// ```
pub struct LmdbDurableTier {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl std::fmt::Debug for LmdbDurableTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDurableTier")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbDurableTier {
    /// Open (or create) the store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&path).map_err(|e| StorageError::Open {
            reason: format!("{}: {}", path.as_ref().display(), e),
        })?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| StorageError::Open {
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| StorageError::Open {
                reason: e.to_string(),
            })?;
        wtxn.commit().map_err(txn_error)?;

        tracing::info!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB durable tier");
        Ok(Self { env, db })
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut keys = Vec::new();
        for result in self.db.iter(&rtxn).map_err(txn_error)? {
            match result {
                Ok((key, _)) if key.starts_with(prefix) => keys.push(key.to_vec()),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable LMDB record");
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl DurableTier for LmdbDurableTier {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let bytes = self
            .db
            .get(&rtxn, key.as_str().as_bytes())
            .map_err(txn_error)?;
        Ok(bytes.map(<[u8]>::to_vec))
    }

    async fn put(&self, key: &CacheKey, bytes: Vec<u8>) -> Result<(), StorageError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, key.as_str().as_bytes(), &bytes)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool, StorageError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_str().as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let doomed = self.keys_with_prefix(prefix.as_bytes())?;
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut deleted = 0u64;
        for key in &doomed {
            if self.db.delete(&mut wtxn, key).map_err(txn_error)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }

    async fn len(&self) -> Result<u64, StorageError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        self.db.len(&rtxn).map_err(txn_error)
    }

    fn backend_name(&self) -> &'static str {
        "lmdb"
    }
}
