//! Leasewire Sync - Refresh Coordination and Alert Delivery
//!
//! The top of the stack:
//! - `RefreshCoordinator`: freshness-driven scheduler, one in-flight
//!   refresh per resource key
//! - `AlertCenter`: visible notices, deduplication, action routing
//! - `NotificationService`: wires multiplexer, normalizer, cache,
//!   coordinator and alert center into one start/stop unit
//! - `SyncConfig`: TOML configuration for the daemon

pub mod alerts;
pub mod config;
pub mod refresh;
pub mod service;
pub mod telemetry;

pub use alerts::{
    AlertCenter, AlertError, AlertSurface, DeliveryOutcome, Navigator, Notice, NoticeId,
    TracingNavigator, TracingSurface,
};
pub use config::{ConfigError, DurableBackend, SyncConfig};
pub use refresh::{
    RefreshConfig, RefreshCoordinator, RefreshHandle, RefreshObserver, RefreshRequest,
    RefreshState, RefreshTicket, Resource, RunOutcome, TickReport,
};
pub use service::{ChangeReport, DataStatus, NotificationService, ServiceDeps, ServiceOptions};
pub use telemetry::init_tracing;
