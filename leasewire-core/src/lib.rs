//! Leasewire Core - Shared Data Types
//!
//! Pure data structures used by every other leasewire crate:
//! - `ChangeEvent` / `Record`: raw row-level notifications from the backend
//! - `DomainAlert`: normalized, typed business events
//! - `CacheEntry`, `CacheKey`, `KeyPattern`, `Ttl`: cache vocabulary
//! - `Clock`: the single source of "now" for every expiry decision
//!
//! This crate contains no I/O.

mod alert;
mod cache;
mod clock;
mod error;
mod event;

pub use alert::{ActionRef, AlertKind, DomainAlert, Severity};
pub use cache::{CacheEntry, CacheKey, KeyPattern, Ttl};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    CacheCorruptionError, FetchError, NormalizationError, StorageError, SyncError, SyncResult,
    TransportError,
};
pub use event::{ChangeEvent, Operation, Record, Topic};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
