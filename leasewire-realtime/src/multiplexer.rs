//! Channel multiplexer.
//!
//! One change-feed connection per topic, shared by every handler registered
//! for that topic. Each topic is driven by a single pump task, so a handler
//! sees events in arrival order and never runs concurrently with itself for
//! that registration.
//!
//! ```text
//!  ChangeFeed ──connect(topic)──► pump task ──► handler 1
//!                                     │    ──► handler 2 (mpsc)
//!                                     └─ reconnect with backoff
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::StreamExt;
use leasewire_core::{ChangeEvent, Topic};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backoff::{Backoff, ReconnectConfig};
use crate::feed::ChangeFeed;

/// Callback handler. Runs on the topic's pump task; keep it short.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &ChangeEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
{
    fn handle(&self, event: &ChangeEvent) {
        (self)(event)
    }
}

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Connection state of one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Waiting out the backoff after `attempt` consecutive failures.
    Reconnecting { attempt: u32 },
}

#[derive(Clone)]
enum Sink {
    Callback(Arc<dyn EventHandler>),
    Channel(mpsc::Sender<ChangeEvent>),
}

struct TopicEntry {
    /// Distinguishes this connection from a later one on the same topic.
    epoch: u64,
    handlers: Vec<(HandlerId, Sink)>,
    state: watch::Receiver<ConnectionState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<Topic, TopicEntry>,
    owners: HashMap<HandlerId, Topic>,
}

impl Registry {
    fn is_live(&self, id: HandlerId) -> bool {
        self.owners.contains_key(&id)
    }
}

struct Inner {
    feed: Arc<dyn ChangeFeed>,
    reconnect: ReconnectConfig,
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

/// Reference-counted topic connections with fan-out to handlers.
///
/// Cheap to clone; clones share registrations.
#[derive(Clone)]
pub struct ChannelMultiplexer {
    inner: Arc<Inner>,
}

impl fmt::Debug for ChannelMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelMultiplexer")
            .field("topics", &self.topics())
            .finish()
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChannelMultiplexer {
    pub fn new(feed: Arc<dyn ChangeFeed>, reconnect: ReconnectConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                feed,
                reconnect,
                registry: Arc::new(Mutex::new(Registry::default())),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a callback for `topic`. Opens the topic connection on the
    /// first registration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, topic: impl Into<Topic>, handler: impl EventHandler) -> HandlerId {
        self.register(topic.into(), Sink::Callback(Arc::new(handler)))
    }

    /// Register a handler that forwards events onto `sender`.
    pub fn subscribe_channel(
        &self,
        topic: impl Into<Topic>,
        sender: mpsc::Sender<ChangeEvent>,
    ) -> HandlerId {
        self.register(topic.into(), Sink::Channel(sender))
    }

    /// Remove a registration. Closes the topic connection when it was the
    /// last one. Returns false for unknown ids.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut registry = lock(&self.inner.registry);
        let Some(topic) = registry.owners.remove(&id) else {
            return false;
        };

        let now_empty = match registry.topics.get_mut(&topic) {
            Some(entry) => {
                entry.handlers.retain(|(handler_id, _)| *handler_id != id);
                entry.handlers.is_empty()
            }
            None => false,
        };

        if now_empty {
            if let Some(entry) = registry.topics.remove(&topic) {
                let _ = entry.stop.send(true);
                tracing::info!(topic = %topic, "Last handler left, closing topic connection");
            }
        }
        tracing::debug!(topic = %topic, handler = %id, "Handler unsubscribed");
        true
    }

    /// Release every registration and connection, waiting for the pump
    /// tasks to finish.
    pub async fn shutdown(&self) -> usize {
        let entries: Vec<(Topic, TopicEntry)> = {
            let mut registry = lock(&self.inner.registry);
            registry.owners.clear();
            registry.topics.drain().collect()
        };

        let count = entries.len();
        for (topic, entry) in entries {
            let _ = entry.stop.send(true);
            if let Err(e) = entry.task.await {
                tracing::warn!(topic = %topic, error = %e, "Topic pump ended abnormally");
            }
        }
        if count > 0 {
            tracing::info!(topics = count, "Channel multiplexer shut down");
        }
        count
    }

    /// Topics with at least one registration, sorted.
    pub fn topics(&self) -> Vec<Topic> {
        let registry = lock(&self.inner.registry);
        let mut topics: Vec<Topic> = registry.topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn handler_count(&self, topic: &Topic) -> usize {
        lock(&self.inner.registry)
            .topics
            .get(topic)
            .map_or(0, |entry| entry.handlers.len())
    }

    pub fn connection_state(&self, topic: &Topic) -> Option<ConnectionState> {
        lock(&self.inner.registry)
            .topics
            .get(topic)
            .map(|entry| *entry.state.borrow())
    }

    /// Watch connection state changes for `topic`.
    pub fn watch_connection(&self, topic: &Topic) -> Option<watch::Receiver<ConnectionState>> {
        lock(&self.inner.registry)
            .topics
            .get(topic)
            .map(|entry| entry.state.clone())
    }

    fn register(&self, topic: Topic, sink: Sink) -> HandlerId {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = lock(&self.inner.registry);
        registry.owners.insert(id, topic.clone());

        if let Some(entry) = registry.topics.get_mut(&topic) {
            entry.handlers.push((id, sink));
            tracing::debug!(topic = %topic, handler = %id, "Handler joined existing topic connection");
            return id;
        }

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);
        let pump = Pump {
            topic: topic.clone(),
            epoch: id.0,
            feed: Arc::clone(&self.inner.feed),
            registry: Arc::clone(&self.inner.registry),
            backoff: Backoff::new(self.inner.reconnect.clone()),
            state: state_tx,
            stop: stop_rx,
        };
        let task = tokio::spawn(pump.run());

        registry.topics.insert(
            topic.clone(),
            TopicEntry {
                epoch: id.0,
                handlers: vec![(id, sink)],
                state: state_rx,
                stop: stop_tx,
                task,
            },
        );
        tracing::info!(topic = %topic, handler = %id, "Opening topic connection");
        id
    }
}

/// Per-topic connection loop.
struct Pump {
    topic: Topic,
    epoch: u64,
    feed: Arc<dyn ChangeFeed>,
    registry: Arc<Mutex<Registry>>,
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
    stop: watch::Receiver<bool>,
}

impl Pump {
    async fn run(mut self) {
        loop {
            let connected = tokio::select! {
                _ = self.stop.changed() => return,
                result = self.feed.connect(&self.topic) => result,
            };

            match connected {
                Ok(mut events) => {
                    self.backoff.reset();
                    self.state.send_replace(ConnectionState::Connected);
                    tracing::info!(topic = %self.topic, "Topic connection established");

                    loop {
                        let next = tokio::select! {
                            _ = self.stop.changed() => return,
                            next = events.next() => next,
                        };
                        match next {
                            Some(Ok(event)) => self.deliver(event).await,
                            Some(Err(err)) => {
                                tracing::warn!(topic = %self.topic, error = %err, "Topic connection lost");
                                break;
                            }
                            None => {
                                tracing::info!(topic = %self.topic, "Topic connection closed");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        topic = %self.topic,
                        attempt = self.backoff.attempt() + 1,
                        error = %err,
                        "Topic connection failed"
                    );
                }
            }

            let delay = self.backoff.next_delay();
            self.state.send_replace(ConnectionState::Reconnecting {
                attempt: self.backoff.attempt(),
            });
            tracing::debug!(topic = %self.topic, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

            tokio::select! {
                _ = self.stop.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn deliver(&self, event: ChangeEvent) {
        let handlers: Vec<(HandlerId, Sink)> = match lock(&self.registry).topics.get(&self.topic) {
            Some(entry) if entry.epoch == self.epoch => entry.handlers.clone(),
            _ => return,
        };

        for (id, sink) in handlers {
            // A handler removed while this event was queued must not see it.
            if !lock(&self.registry).is_live(id) {
                continue;
            }
            match sink {
                Sink::Callback(handler) => handler.handle(&event),
                Sink::Channel(sender) => {
                    if sender.send(event.clone()).await.is_err() {
                        tracing::debug!(topic = %self.topic, handler = %id, "Handler channel closed, dropping event");
                    }
                }
            }
        }
    }
}
