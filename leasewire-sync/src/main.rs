//! Leasewire sync daemon.
//!
//! Loads configuration, opens the durable cache tier, connects the change
//! feed and query API, and runs the notification service until Ctrl-C.

use std::sync::Arc;

use leasewire_core::{StorageError, SystemClock};
use leasewire_realtime::{ClientError, RestQueryClient, WsChangeFeed};
use leasewire_storage::{DurableTier, InMemoryDurableTier, LmdbDurableTier};
use leasewire_sync::telemetry::TelemetryError;
use leasewire_sync::{
    init_tracing, ConfigError, DurableBackend, NotificationService, ServiceDeps, ServiceOptions,
    SyncConfig, TracingNavigator, TracingSurface,
};

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let config = SyncConfig::load()?;
    init_tracing(&config.log)?;

    let durable: Arc<dyn DurableTier> = match config.cache.durable {
        DurableBackend::Lmdb => Arc::new(LmdbDurableTier::open(
            &config.cache.lmdb_path,
            config.cache.lmdb_max_size_mb,
        )?),
        DurableBackend::Memory => Arc::new(InMemoryDurableTier::new()),
    };
    let feed = WsChangeFeed::new(config.ws_endpoint.clone(), config.auth.clone())?;
    let query = RestQueryClient::new(&config.api_base_url, &config.auth, config.request_timeout())?;

    let service = NotificationService::new(
        ServiceDeps {
            feed: Arc::new(feed),
            query: Arc::new(query),
            durable,
            clock: Arc::new(SystemClock),
            surface: Arc::new(TracingSurface),
            navigator: Arc::new(TracingNavigator),
        },
        ServiceOptions::from_config(&config),
    );

    for resource in config.resources() {
        tracing::info!(key = %resource.key, ttl = %resource.ttl, critical = resource.critical, "Tracking resource");
        service.track_resource::<serde_json::Value>(resource);
    }

    service.start();
    tracing::info!(
        api = %config.api_base_url,
        ws = %config.ws_endpoint,
        "Leasewire sync running"
    );

    let mut status = service.watch_status();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                tracing::info!(status = ?current, stale_keys = ?service.stale_keys(), "Data status changed");
            }
        }
    }

    service.stop().await;
    Ok(())
}
