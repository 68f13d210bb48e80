//! Well-known cache keys shared by the dispatcher and data consumers.

use leasewire_core::{CacheKey, KeyPattern};

pub const PAYMENTS_OVERDUE: &str = "payments:overdue";
pub const PAYMENTS_SUMMARY: &str = "payments:summary";
pub const PAYMENTS_PREFIX: &str = "payments:";
pub const MESSAGES_PREFIX: &str = "messages:";
pub const MAINTENANCE_PREFIX: &str = "maintenance:";

pub fn payments_overdue() -> CacheKey {
    CacheKey::new(PAYMENTS_OVERDUE)
}

pub fn payments_summary() -> CacheKey {
    CacheKey::new(PAYMENTS_SUMMARY)
}

/// Detail key for a single payment.
pub fn payment(id: &str) -> CacheKey {
    CacheKey::new(format!("{}{}", PAYMENTS_PREFIX, id))
}

pub fn all_payments() -> KeyPattern {
    KeyPattern::prefix(PAYMENTS_PREFIX)
}

pub fn all_messages() -> KeyPattern {
    KeyPattern::prefix(MESSAGES_PREFIX)
}

pub fn all_maintenance() -> KeyPattern {
    KeyPattern::prefix(MAINTENANCE_PREFIX)
}
