//! Leasewire Test Utilities
//!
//! Shared test infrastructure for the leasewire workspace:
//! - `MockChangeFeed`: scriptable change feed with per-topic connections
//! - `MockQueryApi`: scriptable query API with call counting and a gate
//! - `EventLog`: callback handlers that record what they saw
//! - Proptest generators and record fixtures

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use leasewire_core::{CacheKey, ChangeEvent, FetchError, Topic, TransportError};
use leasewire_realtime::{ChangeFeed, EventStream, QueryApi};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

// Re-export core types for convenience
pub use leasewire_core::{
    ActionRef, AlertKind, DomainAlert, ManualClock, Operation, Record, Severity, Timestamp,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// MOCK CHANGE FEED
// ============================================================================

type EventSender = mpsc::UnboundedSender<Result<ChangeEvent, TransportError>>;

#[derive(Default)]
struct TopicConnection {
    connects: usize,
    failures_left: usize,
    sender: Option<EventSender>,
}

/// Change feed driven by the test.
///
/// Each `connect` opens a fresh in-memory connection; `emit` pushes an
/// event onto the current connection for the event's topic.
#[derive(Default)]
pub struct MockChangeFeed {
    topics: Mutex<HashMap<Topic, TopicConnection>>,
}

impl MockChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `event` to its topic. Returns false when no connection is open.
    pub fn emit(&self, event: ChangeEvent) -> bool {
        let topics = guard(&self.topics);
        topics
            .get(event.topic())
            .and_then(|conn| conn.sender.as_ref())
            .map(|sender| sender.send(Ok(event)).is_ok())
            .unwrap_or(false)
    }

    /// End the current connection for `topic` with a transport error.
    pub fn drop_connection(&self, topic: &Topic) -> bool {
        let mut topics = guard(&self.topics);
        let Some(sender) = topics.get_mut(topic).and_then(|conn| conn.sender.take()) else {
            return false;
        };
        let _ = sender.send(Err(TransportError::ConnectionLost {
            topic: topic.to_string(),
            reason: "dropped by test".to_string(),
        }));
        true
    }

    /// Make the next `count` connect attempts for `topic` fail.
    pub fn fail_next_connects(&self, topic: &Topic, count: usize) {
        guard(&self.topics)
            .entry(topic.clone())
            .or_default()
            .failures_left = count;
    }

    pub fn connect_count(&self, topic: &Topic) -> usize {
        guard(&self.topics).get(topic).map_or(0, |conn| conn.connects)
    }

    /// True when the consumer side of `topic`'s connection is gone.
    pub fn is_closed(&self, topic: &Topic) -> bool {
        guard(&self.topics)
            .get(topic)
            .and_then(|conn| conn.sender.as_ref())
            .map_or(true, |sender| sender.is_closed())
    }

    /// True when `topic` has an open connection with a live consumer.
    pub fn is_connected(&self, topic: &Topic) -> bool {
        !self.is_closed(topic)
    }

    pub async fn wait_for_connects(&self, topic: &Topic, count: usize) -> bool {
        wait_until(Duration::from_secs(2), || self.connect_count(topic) >= count).await
    }

    pub async fn wait_until_connected(&self, topic: &Topic) -> bool {
        wait_until(Duration::from_secs(2), || self.is_connected(topic)).await
    }

    pub async fn wait_until_closed(&self, topic: &Topic) -> bool {
        wait_until(Duration::from_secs(2), || self.is_closed(topic)).await
    }
}

#[async_trait]
impl ChangeFeed for MockChangeFeed {
    async fn connect(&self, topic: &Topic) -> Result<EventStream, TransportError> {
        let mut topics = guard(&self.topics);
        let conn = topics.entry(topic.clone()).or_default();
        conn.connects += 1;

        if conn.failures_left > 0 {
            conn.failures_left -= 1;
            return Err(TransportError::ConnectFailed {
                topic: topic.to_string(),
                reason: "refused by test".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        conn.sender = Some(sender);
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

// ============================================================================
// MOCK QUERY API
// ============================================================================

/// Query API driven by the test.
///
/// Keys without a scripted response fail with a 404. While the gate is
/// held every query waits, which lets tests pile up concurrent callers.
pub struct MockQueryApi {
    responses: Mutex<HashMap<String, Value>>,
    failures: Mutex<HashMap<String, FetchError>>,
    calls: Mutex<HashMap<String, usize>>,
    gate: watch::Sender<bool>,
}

impl Default for MockQueryApi {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            responses: Mutex::default(),
            failures: Mutex::default(),
            calls: Mutex::default(),
            gate,
        }
    }
}

impl MockQueryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: &str, body: Value) {
        guard(&self.responses).insert(key.to_string(), body);
    }

    pub fn fail(&self, key: &str, error: FetchError) {
        guard(&self.failures).insert(key.to_string(), error);
    }

    /// Convenience failure: network unreachable.
    pub fn fail_network(&self, key: &str) {
        self.fail(
            key,
            FetchError::Network {
                key: key.to_string(),
                reason: "unreachable".to_string(),
            },
        );
    }

    pub fn recover(&self, key: &str) {
        guard(&self.failures).remove(key);
    }

    /// Block queries until [`Self::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self, key: &str) -> usize {
        guard(&self.calls).get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        guard(&self.calls).values().sum()
    }

    pub async fn wait_for_calls(&self, key: &str, count: usize) -> bool {
        wait_until(Duration::from_secs(2), || self.calls(key) >= count).await
    }
}

#[async_trait]
impl QueryApi for MockQueryApi {
    async fn query(&self, key: &CacheKey) -> Result<Value, FetchError> {
        *guard(&self.calls).entry(key.to_string()).or_insert(0) += 1;

        let mut gate = self.gate.subscribe();
        while !*gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                break;
            }
        }

        if let Some(error) = guard(&self.failures).get(key.as_str()).cloned() {
            return Err(error);
        }
        guard(&self.responses)
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| FetchError::Remote {
                key: key.to_string(),
                status: 404,
                message: "no scripted response".to_string(),
            })
    }
}

// ============================================================================
// RECORDING HANDLERS
// ============================================================================

/// Shared log of `(label, event)` pairs written by callback handlers.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<(String, ChangeEvent)>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that records every event under `label`.
    pub fn handler(&self, label: &str) -> impl Fn(&ChangeEvent) + Send + Sync + 'static {
        let entries = Arc::clone(&self.entries);
        let label = label.to_string();
        move |event: &ChangeEvent| guard(&entries).push((label.clone(), event.clone()))
    }

    pub fn labels(&self) -> Vec<String> {
        guard(&self.entries).iter().map(|(label, _)| label.clone()).collect()
    }

    pub fn events_for(&self, label: &str) -> Vec<ChangeEvent> {
        guard(&self.entries)
            .iter()
            .filter(|(l, _)| l == label)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        guard(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        guard(&self.entries).is_empty()
    }

    pub async fn wait_for_len(&self, len: usize) -> bool {
        wait_until(Duration::from_secs(2), || self.len() >= len).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and events for common scenarios.

    use chrono::Utc;
    use leasewire_core::{ChangeEvent, Record, Topic};

    pub fn payment(id: &str, status: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("status", status)
            .with("amount", 1450)
            .with("due_date", "2024-06-01")
            .with("tenant_name", "Dana Whitfield")
            .with("unit_label", "4B")
    }

    pub fn maintenance_request(id: &str, status: &str, priority: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("status", status)
            .with("priority", priority)
            .with("title", "Leaking radiator")
            .with("property_name", "Maple Court")
            .with("notes", "")
    }

    pub fn tenant_message(id: &str, conversation_id: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("conversation_id", conversation_id)
            .with("sender_type", "tenant")
            .with("sender_name", "Ravi Patel")
            .with("body", "The hallway light is out again.")
    }

    /// Payment `id` moving from one status to another.
    pub fn payment_status_change(id: &str, from: &str, to: &str) -> ChangeEvent {
        ChangeEvent::update(Topic::payments(), payment(id, from), payment(id, to), Utc::now())
    }

    /// Maintenance update that only touches a non-whitelisted column.
    pub fn maintenance_notes_edit(id: &str, notes: &str) -> ChangeEvent {
        let old = maintenance_request(id, "open", "normal");
        let new = old.clone().with("notes", notes);
        ChangeEvent::update(Topic::maintenance_requests(), old, new, Utc::now())
    }

    pub fn new_tenant_message(id: &str, conversation_id: &str) -> ChangeEvent {
        ChangeEvent::insert(Topic::messages(), tenant_message(id, conversation_id), Utc::now())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for leasewire types.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    /// Generate a Timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// One of the known topics, or an unknown one.
    pub fn arb_topic() -> impl Strategy<Value = Topic> {
        prop_oneof![
            Just(Topic::payments()),
            Just(Topic::maintenance_requests()),
            Just(Topic::messages()),
            "[a-z]{3,10}".prop_map(Topic::new),
        ]
    }

    pub fn arb_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::Insert),
            Just(Operation::Update),
            Just(Operation::Delete),
        ]
    }

    pub fn arb_alert_kind() -> impl Strategy<Value = AlertKind> {
        proptest::sample::select(AlertKind::ALL.to_vec())
    }

    pub fn arb_field_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            prop_oneof![
                Just("pending"),
                Just("overdue"),
                Just("paid"),
                Just("open"),
                Just("in_progress"),
                Just("urgent"),
                Just("emergency"),
                Just("tenant"),
            ]
            .prop_map(Value::from),
            "[a-z ]{0,16}".prop_map(Value::from),
        ]
    }

    /// A record with an id plus a random mix of known and unknown columns.
    pub fn arb_record() -> impl Strategy<Value = Record> {
        let columns = prop_oneof![
            Just("status".to_string()),
            Just("amount".to_string()),
            Just("due_date".to_string()),
            Just("priority".to_string()),
            Just("sender_type".to_string()),
            Just("conversation_id".to_string()),
            "[a-z_]{3,12}",
        ];
        (
            "[a-z0-9-]{1,12}",
            proptest::collection::btree_map(columns, arb_field_value(), 0..8),
        )
            .prop_map(|(id, fields)| {
                fields
                    .into_iter()
                    .fold(Record::new().with("id", id), |record, (field, value)| {
                        if field == "id" {
                            record
                        } else {
                            record.with(field, value)
                        }
                    })
            })
    }

    /// A well-formed change event: the records its operation needs are present.
    pub fn arb_change_event() -> impl Strategy<Value = ChangeEvent> {
        (arb_topic(), arb_operation(), arb_record(), arb_record(), arb_timestamp()).prop_map(
            |(topic, operation, old, new, at)| match operation {
                Operation::Insert => ChangeEvent::insert(topic, new, at),
                Operation::Update => ChangeEvent::update(topic, old, new, at),
                Operation::Delete => ChangeEvent::delete(topic, old, at),
            },
        )
    }

    pub fn arb_domain_alert() -> impl Strategy<Value = DomainAlert> {
        (arb_alert_kind(), "[a-z0-9-]{1,8}", "[A-Za-z ]{1,24}", arb_timestamp()).prop_map(
            |(kind, subject, title, at)| {
                DomainAlert::new(kind, subject.clone(), title, at)
                    .with_action(ActionRef::new(format!("/subjects/{}", subject)))
            },
        )
    }
}
