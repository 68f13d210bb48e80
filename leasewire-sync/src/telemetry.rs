//! Tracing subscriber setup for the daemon.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSection;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log filter {filter}: {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("Failed to init subscriber: {0}")]
    Init(String),
}

/// Filter from `RUST_LOG` when set, otherwise from `[log] filter`.
pub fn env_filter(log: &LogSection) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&log.filter).map_err(|e| TelemetryError::InvalidFilter {
        filter: log.filter.clone(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(log: &LogSection) -> Result<(), TelemetryError> {
    let filter = env_filter(log)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(filter = %log.filter, json = log.json, "Telemetry initialized");
    Ok(())
}
