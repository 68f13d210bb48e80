//! Raw change events as delivered by the backend change feed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NormalizationError;
use crate::Timestamp;

/// Logical grouping of change events. One topic per backend table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub const PAYMENTS: &'static str = "payments";
    pub const MAINTENANCE_REQUESTS: &'static str = "maintenance_requests";
    pub const MESSAGES: &'static str = "messages";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn payments() -> Self {
        Self::new(Self::PAYMENTS)
    }

    pub fn maintenance_requests() -> Self {
        Self::new(Self::MAINTENANCE_REQUESTS)
    }

    pub fn messages() -> Self {
        Self::new(Self::MESSAGES)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Row-level operation that produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = NormalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(NormalizationError::UnknownOperation {
                operation: other.to_string(),
            }),
        }
    }
}

/// A single row, column name to JSON value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style field setter, mostly for fixtures.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn bool_field(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    /// Primary key rendered as a string. String and integer ids are accepted.
    pub fn id(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// True when any of `fields` holds a different value in `other`.
    ///
    /// A field missing on one side and present on the other counts as a change.
    pub fn differs_on(&self, other: &Record, fields: &[&str]) -> bool {
        fields.iter().any(|field| self.get(field) != other.get(field))
    }

    /// The subset of `fields` whose values differ between the two records.
    pub fn changed_fields<'a>(&self, other: &Record, fields: &[&'a str]) -> Vec<&'a str> {
        fields
            .iter()
            .copied()
            .filter(|field| self.get(field) != other.get(field))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Record {
    type Error = Value;

    /// Only JSON objects are records; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

/// Raw notification from a change-event source.
///
/// Ephemeral: never persisted, consumed once per subscriber registration.
/// `received_at` is stamped by the transport so that normalization stays a
/// pure function of the event.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub source_table: Topic,
    pub operation: Operation,
    pub old_record: Option<Record>,
    pub new_record: Option<Record>,
    pub received_at: Timestamp,
}

impl ChangeEvent {
    pub fn insert(topic: impl Into<Topic>, record: Record, received_at: Timestamp) -> Self {
        Self {
            source_table: topic.into(),
            operation: Operation::Insert,
            old_record: None,
            new_record: Some(record),
            received_at,
        }
    }

    pub fn update(
        topic: impl Into<Topic>,
        old_record: Record,
        new_record: Record,
        received_at: Timestamp,
    ) -> Self {
        Self {
            source_table: topic.into(),
            operation: Operation::Update,
            old_record: Some(old_record),
            new_record: Some(new_record),
            received_at,
        }
    }

    pub fn delete(topic: impl Into<Topic>, old_record: Record, received_at: Timestamp) -> Self {
        Self {
            source_table: topic.into(),
            operation: Operation::Delete,
            old_record: Some(old_record),
            new_record: None,
            received_at,
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.source_table
    }
}
