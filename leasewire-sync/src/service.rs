//! Notification service.
//!
//! Owns one multiplexer, normalizer/dispatcher, cache, refresh coordinator
//! and alert center, wired together:
//!
//! ```text
//! topic pumps ──mpsc──► consumer task ──normalize──► dispatch
//!                                                    ├─ invalidate cache patterns
//!                                                    └─ deliver to AlertCenter
//! read(key) ──► RefreshCoordinator ──► TwoTierCache / QueryApi
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use leasewire_core::{
    AlertKind, CacheKey, ChangeEvent, Clock, FetchError, KeyPattern, NormalizationError, Topic, Ttl,
};
use leasewire_events::{normalize, AlertDispatcher};
use leasewire_realtime::{
    fetch_typed, ChangeFeed, ChannelMultiplexer, HandlerId, QueryApi, ReconnectConfig,
};
use leasewire_storage::{CacheConfig, CacheRead, Cacheable, DurableTier, TwoTierCache};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::alerts::{AlertCenter, AlertSurface, DeliveryOutcome, Navigator, DEFAULT_ACK_MEMORY};
use crate::config::SyncConfig;
use crate::refresh::{RefreshConfig, RefreshCoordinator, RefreshObserver, Resource, RunOutcome};

/// External collaborators the service is built from.
pub struct ServiceDeps {
    pub feed: Arc<dyn ChangeFeed>,
    pub query: Arc<dyn QueryApi>,
    pub durable: Arc<dyn DurableTier>,
    pub clock: Arc<dyn Clock>,
    pub surface: Arc<dyn AlertSurface>,
    pub navigator: Arc<dyn Navigator>,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub topics: Vec<Topic>,
    pub cache: CacheConfig,
    pub refresh: RefreshConfig,
    pub reconnect: ReconnectConfig,
    pub surfaced: Vec<AlertKind>,
    pub ack_memory: usize,
    /// Capacity of the queue between topic pumps and the consumer task.
    pub queue_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            topics: vec![Topic::payments(), Topic::maintenance_requests(), Topic::messages()],
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            reconnect: ReconnectConfig::default(),
            surfaced: AlertDispatcher::default().surfaced_kinds().collect(),
            ack_memory: DEFAULT_ACK_MEMORY,
            queue_capacity: 256,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            topics: config.topics(),
            cache: config.cache_config(),
            refresh: config.refresh_config(),
            reconnect: config.reconnect.clone(),
            surfaced: config.alerts.surfaced.clone(),
            ack_memory: config.alerts.ack_memory,
            queue_capacity: config.alerts.queue_capacity,
        }
    }
}

/// The single "data may be out of date" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStatus {
    Fresh,
    Stale,
}

/// Keys whose last refresh did not produce fresh data.
#[derive(Debug)]
struct StaleTracker {
    stale: Mutex<BTreeSet<CacheKey>>,
    status: watch::Sender<DataStatus>,
}

impl StaleTracker {
    fn new() -> Self {
        let (status, _) = watch::channel(DataStatus::Fresh);
        Self {
            stale: Mutex::new(BTreeSet::new()),
            status,
        }
    }

    fn update(&self, key: &CacheKey, stale: bool) {
        let mut keys = lock(&self.stale);
        let changed = if stale {
            keys.insert(key.clone())
        } else {
            keys.remove(key)
        };
        if !changed {
            return;
        }
        let next = if keys.is_empty() {
            DataStatus::Fresh
        } else {
            DataStatus::Stale
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        tracing::debug!(key = %key, stale, status = ?next, "Data status updated");
    }

    fn keys(&self) -> Vec<CacheKey> {
        lock(&self.stale).iter().cloned().collect()
    }
}

impl RefreshObserver for StaleTracker {
    fn completed(&self, key: &CacheKey, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Fetched => self.update(key, false),
            RunOutcome::Stale | RunOutcome::Failed(_) => self.update(key, true),
            RunOutcome::Cancelled => {}
        }
    }
}

/// What one change event did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// Alerts the event normalized into.
    pub alerts: usize,
    /// Alerts that invalidated data but are not surfaced.
    pub unsurfaced: usize,
    pub delivered: Vec<DeliveryOutcome>,
    pub invalidated: Vec<KeyPattern>,
    /// Durable entries removed by the invalidations.
    pub evicted: u64,
}

impl ChangeReport {
    pub fn shown(&self) -> usize {
        self.delivered
            .iter()
            .filter(|outcome| matches!(outcome, DeliveryOutcome::Shown(_)))
            .count()
    }
}

struct Session {
    handlers: Vec<HandlerId>,
    stop: watch::Sender<bool>,
    consumer: JoinHandle<()>,
}

struct Inner {
    multiplexer: ChannelMultiplexer,
    dispatcher: AlertDispatcher,
    cache: Arc<TwoTierCache>,
    coordinator: RefreshCoordinator,
    alerts: AlertCenter,
    query: Arc<dyn QueryApi>,
    tracker: Arc<StaleTracker>,
    options: ServiceOptions,
    session: Mutex<Option<Session>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Realtime sync and cache coordination for one client session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct NotificationService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NotificationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationService")
            .field("topics", &self.inner.options.topics)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl NotificationService {
    pub fn new(deps: ServiceDeps, options: ServiceOptions) -> Self {
        let cache = Arc::new(TwoTierCache::new(
            deps.durable,
            Arc::clone(&deps.clock),
            options.cache.clone(),
        ));
        let tracker = Arc::new(StaleTracker::new());
        let coordinator = RefreshCoordinator::with_observer(
            Arc::clone(&cache),
            options.refresh.clone(),
            tracker.clone(),
        );
        let alerts = AlertCenter::new(deps.surface, deps.navigator, deps.clock, options.ack_memory);

        Self {
            inner: Arc::new(Inner {
                multiplexer: ChannelMultiplexer::new(deps.feed, options.reconnect.clone()),
                dispatcher: AlertDispatcher::new(options.surfaced.iter().copied()),
                cache,
                coordinator,
                alerts,
                query: deps.query,
                tracker,
                options,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn alerts(&self) -> &AlertCenter {
        &self.inner.alerts
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.inner.cache
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    pub fn multiplexer(&self) -> &ChannelMultiplexer {
        &self.inner.multiplexer
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.session).is_some()
    }

    pub fn status(&self) -> DataStatus {
        *self.inner.tracker.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<DataStatus> {
        self.inner.tracker.status.subscribe()
    }

    /// Keys currently holding the indicator at `Stale`.
    pub fn stale_keys(&self) -> Vec<CacheKey> {
        self.inner.tracker.keys()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Subscribe every configured topic and start the refresh scheduler.
    /// Returns false if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut session = lock(&self.inner.session);
        if session.is_some() {
            return false;
        }

        let (events, queue) = mpsc::channel(self.inner.options.queue_capacity.max(1));
        let handlers = self
            .inner
            .options
            .topics
            .iter()
            .map(|topic| self.inner.multiplexer.subscribe_channel(topic.clone(), events.clone()))
            .collect();
        drop(events);

        let (stop, stop_rx) = watch::channel(false);
        let consumer = tokio::spawn(consume(Arc::downgrade(&self.inner), queue, stop_rx));
        *session = Some(Session {
            handlers,
            stop,
            consumer,
        });
        drop(session);

        self.inner.coordinator.start();
        tracing::info!(topics = self.inner.options.topics.len(), "Notification service started");
        true
    }

    /// Unsubscribe everything, stop the consumer and end the refresh
    /// session. Returns false if not running.
    pub async fn stop(&self) -> bool {
        let session = lock(&self.inner.session).take();
        let Some(session) = session else {
            return false;
        };

        for id in session.handlers {
            self.inner.multiplexer.unsubscribe(id);
        }
        let _ = session.stop.send(true);
        if let Err(e) = session.consumer.await {
            tracing::warn!(error = %e, "Change consumer ended abnormally");
        }
        self.inner.coordinator.stop().await;
        tracing::info!("Notification service stopped");
        true
    }

    // ========================================================================
    // Change events
    // ========================================================================

    /// Apply one change event: invalidate what it made stale, then deliver
    /// its surfaced alerts.
    pub async fn handle_change(&self, event: &ChangeEvent) -> Result<ChangeReport, NormalizationError> {
        let alerts = normalize(event)?;
        let mut report = ChangeReport {
            alerts: alerts.len(),
            ..ChangeReport::default()
        };
        if alerts.is_empty() {
            return Ok(report);
        }

        let dispatch = self.inner.dispatcher.dispatch(alerts);
        report.unsurfaced = dispatch.suppressed;
        for pattern in dispatch.invalidate {
            report.evicted += self.inner.cache.invalidate_pattern(&pattern).await;
            report.invalidated.push(pattern);
        }
        for alert in dispatch.deliver {
            report.delivered.push(self.inner.alerts.deliver(alert));
        }

        tracing::debug!(
            topic = %event.topic(),
            operation = %event.operation,
            alerts = report.alerts,
            shown = report.shown(),
            invalidated = report.invalidated.len(),
            "Change event applied"
        );
        Ok(report)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read `key` through the coordinator, fetching from the query API on a
    /// miss.
    pub async fn read<T: Cacheable>(&self, key: &CacheKey) -> Result<CacheRead<T>, FetchError> {
        let ttl = self.ttl_for(key);
        let query = Arc::clone(&self.inner.query);
        let fetch_key = key.clone();
        self.inner
            .coordinator
            .read(key, ttl, move || async move { fetch_typed::<T>(query.as_ref(), &fetch_key).await })
            .await
    }

    /// Keep `resource` refreshed in the background as `T`.
    pub fn track_resource<T: Cacheable>(&self, resource: Resource) {
        let query = Arc::clone(&self.inner.query);
        let key = resource.key.clone();
        self.inner.coordinator.track::<T, _, _>(resource, move || {
            let query = Arc::clone(&query);
            let key = key.clone();
            async move { fetch_typed::<T>(query.as_ref(), &key).await }
        });
    }

    fn ttl_for(&self, key: &CacheKey) -> Ttl {
        self.inner
            .coordinator
            .tracked()
            .into_iter()
            .find(|resource| &resource.key == key)
            .map_or(self.inner.cache.config().default_ttl, |resource| resource.ttl)
    }
}

async fn consume(
    service: Weak<Inner>,
    mut queue: mpsc::Receiver<ChangeEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = stop.changed() => break,
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = service.upgrade() else {
            break;
        };
        let service = NotificationService { inner };
        if let Err(err) = service.handle_change(&event).await {
            tracing::warn!(topic = %event.topic(), error = %err, "Dropping change event that failed to normalize");
        }
    }
    tracing::debug!("Change consumer stopped");
}
