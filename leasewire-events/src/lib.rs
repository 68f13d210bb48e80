//! Leasewire Events - Normalization and Dispatch
//!
//! Turns raw row-level change events into typed `DomainAlert`s and decides
//! where each alert goes.
//!
//! # Architecture
//!
//! ```text
//! ChangeEvent ──normalize──► Vec<DomainAlert> ──dispatch──► Dispatch
//!                                                          ├─ deliver: alerts for the UI surface
//!                                                          └─ invalidate: stale cache patterns
//! ```
//!
//! Normalization is pure: no I/O, no clock reads (the event carries its own
//! `received_at`). Cache invalidation is returned as data for the caller to
//! apply, never performed inline.

pub mod dispatch;
pub mod keys;
pub mod normalizer;
mod rules;

pub use dispatch::{AlertDispatcher, Dispatch};
pub use normalizer::{normalize, whitelist_for};
