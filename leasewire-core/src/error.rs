//! Error types for leasewire operations
//!
//! Only `FetchError` without a stale fallback ever reaches a caller; every
//! other kind is absorbed where it happens and logged.

use thiserror::Error;

/// Change-feed connection errors. Recovered by reconnecting with backoff.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect change feed for topic {topic}: {reason}")]
    ConnectFailed { topic: String, reason: String },

    #[error("Change feed for topic {topic} dropped: {reason}")]
    ConnectionLost { topic: String, reason: String },

    #[error("Change feed protocol error on topic {topic}: {reason}")]
    Protocol { topic: String, reason: String },
}

/// Remote query failures.
///
/// `Clone` because one in-flight fetch result is shared by every coalesced
/// waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Query for {key} failed with status {status}: {message}")]
    Remote {
        key: String,
        status: u16,
        message: String,
    },

    #[error("Query for {key} failed: {reason}")]
    Network { key: String, reason: String },

    #[error("Response for {key} could not be decoded: {reason}")]
    Decode { key: String, reason: String },

    #[error("Refresh of {key} was cancelled because its session ended")]
    Cancelled { key: String },
}

impl FetchError {
    pub fn key(&self) -> &str {
        match self {
            Self::Remote { key, .. }
            | Self::Network { key, .. }
            | Self::Decode { key, .. }
            | Self::Cancelled { key } => key,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Malformed change records. The offending event is logged and dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("{operation} event on {topic} is missing its {side} record")]
    MissingRecord {
        topic: String,
        operation: String,
        side: &'static str,
    },

    #[error("Record on {topic} is missing required field {field}")]
    MissingField { topic: String, field: String },

    #[error("Unknown change operation: {operation}")]
    UnknownOperation { operation: String },

    #[error("Malformed change payload: {reason}")]
    MalformedPayload { reason: String },
}

/// Durable cache entry that failed to deserialize. Treated as a miss and
/// the entry is deleted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cache entry {key} is corrupted: {reason}")]
pub struct CacheCorruptionError {
    pub key: String,
    pub reason: String,
}

/// Durable tier backend failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open durable store: {reason}")]
    Open { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Failed to serialize cache entry {key}: {reason}")]
    Serialization { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Master error type for all leasewire errors.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Cache corruption: {0}")]
    CacheCorruption(#[from] CacheCorruptionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for leasewire operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display_connection_lost() {
        let err = TransportError::ConnectionLost {
            topic: "payments".to_string(),
            reason: "reset by peer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("payments"));
        assert!(msg.contains("reset by peer"));
    }

    #[test]
    fn test_fetch_error_key_and_cancelled() {
        let err = FetchError::Remote {
            key: "payments:overdue".to_string(),
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.key(), "payments:overdue");
        assert!(!err.is_cancelled());
        assert!(format!("{}", err).contains("503"));

        let cancelled = FetchError::Cancelled {
            key: "messages:inbox".to_string(),
        };
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.key(), "messages:inbox");
    }

    #[test]
    fn test_normalization_error_display_missing_record() {
        let err = NormalizationError::MissingRecord {
            topic: "payments".to_string(),
            operation: "update".to_string(),
            side: "new",
        };
        let msg = format!("{}", err);
        assert!(msg.contains("update"));
        assert!(msg.contains("payments"));
        assert!(msg.contains("new"));
    }

    #[test]
    fn test_cache_corruption_display() {
        let err = CacheCorruptionError {
            key: "payments:overdue".to_string(),
            reason: "expected value".to_string(),
        };
        assert!(format!("{}", err).contains("payments:overdue"));
    }

    #[test]
    fn test_sync_error_from_variants() {
        let transport = SyncError::from(TransportError::Protocol {
            topic: "messages".to_string(),
            reason: "bad frame".to_string(),
        });
        assert!(matches!(transport, SyncError::Transport(_)));

        let fetch = SyncError::from(FetchError::Cancelled {
            key: "k".to_string(),
        });
        assert!(matches!(fetch, SyncError::Fetch(_)));

        let normalization = SyncError::from(NormalizationError::UnknownOperation {
            operation: "truncate".to_string(),
        });
        assert!(matches!(normalization, SyncError::Normalization(_)));

        let corruption = SyncError::from(CacheCorruptionError {
            key: "k".to_string(),
            reason: "eof".to_string(),
        });
        assert!(matches!(corruption, SyncError::CacheCorruption(_)));

        let storage = SyncError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, SyncError::Storage(_)));
    }
}
