//! Refresh coordinator.
//!
//! Each resource key moves through `Idle → Scheduled → InFlight → Idle`.
//! At most one refresh per key is in flight; a reader that arrives while
//! one is running waits for its result instead of fetching again.
//!
//! Refreshes run on their own task, so a refresh completes (and writes the
//! cache) even if every waiter goes away. Ending the session makes any
//! refresh still running discard its result on arrival.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use leasewire_core::{CacheKey, FetchError, Timestamp, Ttl};
use leasewire_storage::{CacheRead, Cacheable, ReadSource, TwoTierCache};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Age after which a normal resource is refreshed on the next tick.
    pub min_staleness: Duration,
    /// Period of the normal scheduler pass.
    pub tick_interval: Duration,
    /// Period of the critical pass, which ignores cached age.
    pub critical_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min_staleness: Duration::from_secs(120),
            tick_interval: Duration::from_secs(60),
            critical_interval: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Scheduled,
    InFlight,
}

/// Refresh bookkeeping for one resource key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTicket {
    pub resource_key: CacheKey,
    pub state: RefreshState,
    pub last_started_at: Option<Timestamp>,
}

impl RefreshTicket {
    fn idle(resource_key: CacheKey) -> Self {
        Self {
            resource_key,
            state: RefreshState::Idle,
            last_started_at: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.state == RefreshState::InFlight
    }
}

/// A resource refreshed in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub key: CacheKey,
    pub ttl: Ttl,
    /// Critical resources are refreshed every critical pass regardless of age.
    pub critical: bool,
}

impl Resource {
    pub fn new(key: impl Into<CacheKey>, ttl: Ttl) -> Self {
        Self {
            key: key.into(),
            ttl,
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// How one refresh run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Fetched,
    /// The fetch failed and the retained durable value was served.
    Stale,
    Failed(FetchError),
    Cancelled,
}

impl RunOutcome {
    fn of(outcome: &Outcome) -> Self {
        match outcome {
            Ok(completed) if completed.source == ReadSource::Stale => RunOutcome::Stale,
            Ok(_) => RunOutcome::Fetched,
            Err(err) if err.is_cancelled() => RunOutcome::Cancelled,
            Err(err) => RunOutcome::Failed(err.clone()),
        }
    }
}

/// Told about every finished refresh run.
pub trait RefreshObserver: Send + Sync + 'static {
    fn completed(&self, key: &CacheKey, outcome: &RunOutcome);
}

/// Result of a scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub refreshed: Vec<CacheKey>,
    pub stale: Vec<CacheKey>,
    pub failed: Vec<(CacheKey, FetchError)>,
}

impl TickReport {
    pub fn runs(&self) -> usize {
        self.refreshed.len() + self.stale.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs() == 0
    }
}

/// Type-erased `CacheRead<T>` shared between coalesced waiters.
#[derive(Clone)]
struct Completed {
    source: ReadSource,
    read: Arc<dyn Any + Send + Sync>,
}

impl Completed {
    fn new<T: Cacheable>(read: CacheRead<T>) -> Self {
        Self {
            source: read.source(),
            read: Arc::new(read),
        }
    }

    fn downcast<T: Cacheable>(self, key: &CacheKey) -> Result<CacheRead<T>, FetchError> {
        self.read
            .downcast::<CacheRead<T>>()
            .map(|read| (*read).clone())
            .map_err(|_| FetchError::Decode {
                key: key.to_string(),
                reason: format!(
                    "in-flight refresh produced a value other than {}",
                    std::any::type_name::<T>()
                ),
            })
    }
}

impl fmt::Debug for Completed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completed")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

type Outcome = Result<Completed, FetchError>;
type OutcomeRx = watch::Receiver<Option<Outcome>>;

async fn wait_for(mut outcome: OutcomeRx, key: &CacheKey) -> Outcome {
    loop {
        let current = outcome.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if outcome.changed().await.is_err() {
            let last = outcome.borrow().clone();
            return last.unwrap_or_else(|| {
                Err(FetchError::Network {
                    key: key.to_string(),
                    reason: "refresh task ended without a result".to_string(),
                })
            });
        }
    }
}

/// Pending result of a refresh started or joined by
/// [`RefreshCoordinator::request_refresh`].
#[derive(Debug)]
pub struct RefreshHandle {
    key: CacheKey,
    outcome: OutcomeRx,
}

impl RefreshHandle {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the run to finish. `Ok` carries where the value came from.
    pub async fn wait(self) -> Result<ReadSource, FetchError> {
        wait_for(self.outcome, &self.key)
            .await
            .map(|completed| completed.source)
    }
}

#[derive(Debug)]
pub enum RefreshRequest {
    Started(RefreshHandle),
    /// A refresh for the key was already in flight.
    Joined(RefreshHandle),
    /// The next scheduler pass will refresh the key.
    AlreadyScheduled,
    Untracked,
}

struct Run {
    id: u64,
    session: u64,
    outcome: OutcomeRx,
}

struct Slot {
    ticket: RefreshTicket,
    run: Option<Run>,
}

impl Slot {
    fn idle(key: CacheKey) -> Self {
        Self {
            ticket: RefreshTicket::idle(key),
            run: None,
        }
    }

    fn running_in(&self, session: u64) -> Option<&Run> {
        self.run.as_ref().filter(|run| run.session == session)
    }
}

type SharedFetch<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;

trait Refresher: Send + Sync {
    fn launch(&self, coordinator: &RefreshCoordinator) -> (OutcomeRx, bool);
}

struct TypedRefresher<T> {
    key: CacheKey,
    ttl: Ttl,
    fetch: SharedFetch<T>,
}

impl<T: Cacheable> Refresher for TypedRefresher<T> {
    fn launch(&self, coordinator: &RefreshCoordinator) -> (OutcomeRx, bool) {
        let fetch = Arc::clone(&self.fetch);
        coordinator.start_or_join::<T, _, _>(&self.key, self.ttl, move || fetch())
    }
}

struct Tracked {
    resource: Resource,
    refresher: Arc<dyn Refresher>,
}

struct Scheduler {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Inner {
    cache: Arc<TwoTierCache>,
    config: RefreshConfig,
    observer: Option<Arc<dyn RefreshObserver>>,
    slots: Mutex<BTreeMap<CacheKey, Slot>>,
    tracked: Mutex<BTreeMap<CacheKey, Tracked>>,
    session: AtomicU64,
    next_run: AtomicU64,
    scheduler: Mutex<Option<Scheduler>>,
}

/// What a spawned run needs to know about how it started.
#[derive(Debug, Clone, Copy)]
struct RunTag {
    id: u64,
    session: u64,
    /// Cache invalidation generation when the run started.
    generation: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Freshness-driven refresh scheduler over a [`TwoTierCache`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("config", &self.inner.config)
            .field("session", &self.session())
            .field("tracked", &lock(&self.inner.tracked).len())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(cache: Arc<TwoTierCache>, config: RefreshConfig) -> Self {
        Self::build(cache, config, None)
    }

    pub fn with_observer(
        cache: Arc<TwoTierCache>,
        config: RefreshConfig,
        observer: Arc<dyn RefreshObserver>,
    ) -> Self {
        Self::build(cache, config, Some(observer))
    }

    fn build(
        cache: Arc<TwoTierCache>,
        config: RefreshConfig,
        observer: Option<Arc<dyn RefreshObserver>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                config,
                observer,
                slots: Mutex::new(BTreeMap::new()),
                tracked: Mutex::new(BTreeMap::new()),
                session: AtomicU64::new(0),
                next_run: AtomicU64::new(1),
                scheduler: Mutex::new(None),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    /// Current session number. Bumped by [`Self::end_session`].
    pub fn session(&self) -> u64 {
        self.inner.session.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Coalesced read-through: cache hit, or join/start the single refresh
    /// for `key`.
    pub async fn read<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        fetch: F,
    ) -> Result<CacheRead<T>, FetchError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if let Some(hit) = self.inner.cache.get::<T>(key).await {
            return Ok(hit);
        }
        self.refresh(key, ttl, fetch).await
    }

    /// Refresh `key` regardless of what is cached, joining a run already in
    /// flight.
    pub async fn refresh<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Ttl,
        fetch: F,
    ) -> Result<CacheRead<T>, FetchError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let (outcome, _) = self.start_or_join::<T, _, _>(key, ttl, fetch);
        wait_for(outcome, key).await?.downcast(key)
    }

    // ========================================================================
    // Tracked resources
    // ========================================================================

    /// Register `resource` for background refresh with `fetch`.
    pub fn track<T, F, Fut>(&self, resource: Resource, fetch: F)
    where
        T: Cacheable,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let fetch: SharedFetch<T> = Arc::new(move || fetch().boxed());
        let refresher = Arc::new(TypedRefresher {
            key: resource.key.clone(),
            ttl: resource.ttl,
            fetch,
        });
        tracing::debug!(key = %resource.key, critical = resource.critical, "Tracking resource");
        lock(&self.inner.tracked).insert(
            resource.key.clone(),
            Tracked {
                resource,
                refresher,
            },
        );
    }

    pub fn untrack(&self, key: &CacheKey) -> bool {
        lock(&self.inner.tracked).remove(key).is_some()
    }

    pub fn tracked(&self) -> Vec<Resource> {
        lock(&self.inner.tracked)
            .values()
            .map(|tracked| tracked.resource.clone())
            .collect()
    }

    pub fn state(&self, key: &CacheKey) -> RefreshState {
        lock(&self.inner.slots)
            .get(key)
            .map_or(RefreshState::Idle, |slot| slot.ticket.state)
    }

    pub fn ticket(&self, key: &CacheKey) -> Option<RefreshTicket> {
        lock(&self.inner.slots)
            .get(key)
            .map(|slot| slot.ticket.clone())
    }

    /// Ask for a tracked resource to be refreshed now.
    pub fn request_refresh(&self, key: &CacheKey) -> RefreshRequest {
        let refresher = lock(&self.inner.tracked)
            .get(key)
            .map(|tracked| Arc::clone(&tracked.refresher));
        let Some(refresher) = refresher else {
            return RefreshRequest::Untracked;
        };
        if self.state(key) == RefreshState::Scheduled {
            return RefreshRequest::AlreadyScheduled;
        }

        let (outcome, started) = refresher.launch(self);
        let handle = RefreshHandle {
            key: key.clone(),
            outcome,
        };
        if started {
            RefreshRequest::Started(handle)
        } else {
            RefreshRequest::Joined(handle)
        }
    }

    // ========================================================================
    // Scheduler passes
    // ========================================================================

    /// One normal pass: schedule what is due, then run everything scheduled.
    pub async fn tick(&self) -> TickReport {
        self.schedule_due().await;
        self.run_scheduled().await
    }

    /// Move normal resources that have no entry, or whose entry is older
    /// than `min_staleness`, from `Idle` to `Scheduled`.
    pub async fn schedule_due(&self) -> Vec<CacheKey> {
        let now = self.inner.cache.now();
        let candidates: Vec<CacheKey> = lock(&self.inner.tracked)
            .values()
            .filter(|tracked| !tracked.resource.critical)
            .map(|tracked| tracked.resource.key.clone())
            .collect();

        let mut due = Vec::new();
        for key in candidates {
            let stale = match self.inner.cache.created_at(&key).await {
                None => true,
                Some(created_at) => {
                    let age = (now - created_at).to_std().unwrap_or(Duration::ZERO);
                    age > self.inner.config.min_staleness
                }
            };
            if stale {
                due.push(key);
            }
        }
        self.mark_scheduled(due)
    }

    /// Start every `Scheduled` resource and wait for the runs.
    pub async fn run_scheduled(&self) -> TickReport {
        let scheduled: Vec<CacheKey> = lock(&self.inner.slots)
            .values()
            .filter(|slot| slot.ticket.state == RefreshState::Scheduled)
            .map(|slot| slot.ticket.resource_key.clone())
            .collect();
        self.run_keys(scheduled).await
    }

    /// Refresh every critical resource, whatever its age.
    pub async fn tick_critical(&self) -> TickReport {
        let critical: Vec<CacheKey> = lock(&self.inner.tracked)
            .values()
            .filter(|tracked| tracked.resource.critical)
            .map(|tracked| tracked.resource.key.clone())
            .collect();
        self.mark_scheduled(critical.clone());
        self.run_keys(critical).await
    }

    fn mark_scheduled(&self, keys: Vec<CacheKey>) -> Vec<CacheKey> {
        let session = self.session();
        let mut slots = lock(&self.inner.slots);
        keys.into_iter()
            .filter(|key| {
                let slot = slots
                    .entry(key.clone())
                    .or_insert_with(|| Slot::idle(key.clone()));
                if slot.running_in(session).is_some()
                    || slot.ticket.state == RefreshState::Scheduled
                {
                    return false;
                }
                slot.ticket.state = RefreshState::Scheduled;
                true
            })
            .collect()
    }

    async fn run_keys(&self, keys: Vec<CacheKey>) -> TickReport {
        let mut pending = Vec::with_capacity(keys.len());
        for key in keys {
            let refresher = lock(&self.inner.tracked)
                .get(&key)
                .map(|tracked| Arc::clone(&tracked.refresher));
            match refresher {
                Some(refresher) => {
                    let (outcome, _) = refresher.launch(self);
                    pending.push(async move {
                        let result = wait_for(outcome, &key).await;
                        (key, result)
                    });
                }
                None => self.unschedule(&key),
            }
        }

        let mut report = TickReport::default();
        for (key, result) in join_all(pending).await {
            match result {
                Ok(completed) if completed.source == ReadSource::Stale => report.stale.push(key),
                Ok(_) => report.refreshed.push(key),
                Err(err) => report.failed.push((key, err)),
            }
        }
        report
    }

    fn unschedule(&self, key: &CacheKey) {
        let mut slots = lock(&self.inner.slots);
        if let Some(slot) = slots.get_mut(key) {
            if slot.ticket.state == RefreshState::Scheduled {
                slot.ticket.state = RefreshState::Idle;
            }
        }
        tracing::debug!(key = %key, "Dropped schedule for untracked resource");
    }

    // ========================================================================
    // Runs
    // ========================================================================

    fn start_or_join<T, F, Fut>(&self, key: &CacheKey, ttl: Ttl, fetch: F) -> (OutcomeRx, bool)
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let session = self.session();
        let now = self.inner.cache.now();
        let generation = self.inner.cache.generation(key);
        let (run_id, sender, receiver) = {
            let mut slots = lock(&self.inner.slots);
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::idle(key.clone()));
            if let Some(run) = slot.running_in(session) {
                tracing::debug!(key = %key, run = run.id, "Joining in-flight refresh");
                return (run.outcome.clone(), false);
            }

            let run_id = self.inner.next_run.fetch_add(1, Ordering::Relaxed);
            let (sender, receiver) = watch::channel(None);
            slot.ticket.state = RefreshState::InFlight;
            slot.ticket.last_started_at = Some(now);
            slot.run = Some(Run {
                id: run_id,
                session,
                outcome: receiver.clone(),
            });
            (run_id, sender, receiver)
        };

        tracing::debug!(key = %key, run = run_id, "Starting refresh");
        let run = self
            .clone()
            .complete::<T, Fut>(key.clone(), ttl, RunTag { id: run_id, session, generation }, fetch(), sender);
        tokio::spawn(run);
        (receiver, true)
    }

    async fn complete<T, Fut>(
        self,
        key: CacheKey,
        ttl: Ttl,
        tag: RunTag,
        fetch: Fut,
        sender: watch::Sender<Option<Outcome>>,
    ) where
        T: Cacheable,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let RunTag { id: run_id, session, generation } = tag;
        let result = fetch.await;

        let outcome: Outcome = if self.session() != session {
            tracing::debug!(key = %key, run = run_id, "Refresh outlived its session, discarding result");
            Err(FetchError::Cancelled {
                key: key.to_string(),
            })
        } else {
            match result {
                Ok(value) => {
                    let fetched_at = self.inner.cache.now();
                    let value = Arc::new(value);
                    let cached = self
                        .inner
                        .cache
                        .set_unless_invalidated(&key, Arc::clone(&value), ttl, generation)
                        .await;
                    if !cached {
                        tracing::debug!(key = %key, run = run_id, "Key invalidated while refreshing, result not cached");
                    }
                    Ok(Completed::new(CacheRead::new(value, ReadSource::Fetched, fetched_at)))
                }
                Err(err) => {
                    if !err.is_cancelled() {
                        tracing::warn!(key = %key, error = %err, "Refresh failed");
                    }
                    self.inner
                        .cache
                        .stale_or::<T>(&key, err)
                        .await
                        .map(Completed::new)
                }
            }
        };

        self.finish(&key, run_id);
        if let Some(observer) = &self.inner.observer {
            observer.completed(&key, &RunOutcome::of(&outcome));
        }
        sender.send_replace(Some(outcome));
    }

    fn finish(&self, key: &CacheKey, run_id: u64) {
        let mut slots = lock(&self.inner.slots);
        if let Some(slot) = slots.get_mut(key) {
            if slot.run.as_ref().is_some_and(|run| run.id == run_id) {
                slot.run = None;
                // A pass may have scheduled the key after its session ended.
                if slot.ticket.state == RefreshState::InFlight {
                    slot.ticket.state = RefreshState::Idle;
                }
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the timer task. Returns false if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut scheduler = lock(&self.inner.scheduler);
        if scheduler.is_some() {
            return false;
        }
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_scheduler(
            Arc::downgrade(&self.inner),
            self.inner.config.clone(),
            stop_rx,
        ));
        *scheduler = Some(Scheduler { stop, task });
        tracing::info!(
            tick_secs = self.inner.config.tick_interval.as_secs(),
            critical_secs = self.inner.config.critical_interval.as_secs(),
            "Refresh scheduler started"
        );
        true
    }

    /// End the session: refreshes still running discard their results.
    pub fn end_session(&self) -> u64 {
        let ended = self.inner.session.fetch_add(1, Ordering::SeqCst);
        tracing::info!(session = ended, "Refresh session ended");
        ended
    }

    /// End the session and stop the timer task.
    pub async fn stop(&self) {
        self.end_session();
        let scheduler = lock(&self.inner.scheduler).take();
        if let Some(scheduler) = scheduler {
            let _ = scheduler.stop.send(true);
            if let Err(e) = scheduler.task.await {
                tracing::warn!(error = %e, "Refresh scheduler ended abnormally");
            }
        }
    }
}

async fn run_scheduler(inner: Weak<Inner>, config: RefreshConfig, mut stop: watch::Receiver<bool>) {
    let mut normal = tokio::time::interval(config.tick_interval.max(MIN_PERIOD));
    let mut critical = tokio::time::interval(config.critical_interval.max(MIN_PERIOD));
    normal.set_missed_tick_behavior(MissedTickBehavior::Skip);
    critical.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let critical_pass = tokio::select! {
            _ = stop.changed() => break,
            _ = normal.tick() => false,
            _ = critical.tick() => true,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let coordinator = RefreshCoordinator { inner };

        let pass = async {
            if critical_pass {
                coordinator.tick_critical().await
            } else {
                coordinator.tick().await
            }
        };
        let report = tokio::select! {
            _ = stop.changed() => break,
            report = pass => report,
        };

        if !report.failed.is_empty() {
            tracing::warn!(
                failed = report.failed.len(),
                stale = report.stale.len(),
                critical = critical_pass,
                "Scheduler pass had failures"
            );
        } else if !report.is_empty() {
            tracing::debug!(
                refreshed = report.refreshed.len(),
                stale = report.stale.len(),
                critical = critical_pass,
                "Scheduler pass complete"
            );
        }
    }
    tracing::debug!("Refresh scheduler stopped");
}
