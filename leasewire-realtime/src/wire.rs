//! Change-feed wire format.
//!
//! Client to server: `{"type":"subscribe","topic":"payments"}`.
//!
//! Server to client:
//! `{"type":"UPDATE","table":"payments","record":{..},"old_record":{..}}`.
//! Control frames (`subscribed`, `heartbeat`, `pong`) carry no event.

use std::str::FromStr;

use leasewire_core::{ChangeEvent, NormalizationError, Operation, Record, Timestamp, Topic};
use serde::Deserialize;
use serde_json::{json, Value};

const CONTROL_FRAMES: &[&str] = &["subscribed", "unsubscribed", "heartbeat", "pong", "ack"];

#[derive(Debug, Deserialize)]
struct ChangeFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

pub fn subscribe_frame(topic: &Topic) -> String {
    json!({ "type": "subscribe", "topic": topic.as_str() }).to_string()
}

/// Decode one text frame.
///
/// Returns `Ok(None)` for control frames. Frames without a `table` are
/// attributed to `subscribed_topic`.
pub fn decode_frame(
    text: &str,
    subscribed_topic: &Topic,
    received_at: Timestamp,
) -> Result<Option<ChangeEvent>, NormalizationError> {
    let frame: ChangeFrame =
        serde_json::from_str(text).map_err(|e| NormalizationError::MalformedPayload {
            reason: e.to_string(),
        })?;

    if CONTROL_FRAMES
        .iter()
        .any(|control| frame.kind.eq_ignore_ascii_case(control))
    {
        return Ok(None);
    }

    let operation = Operation::from_str(&frame.kind)?;
    let topic = frame
        .table
        .map(Topic::new)
        .unwrap_or_else(|| subscribed_topic.clone());

    Ok(Some(ChangeEvent {
        source_table: topic,
        operation,
        old_record: record_from(frame.old_record, "old_record")?,
        new_record: record_from(frame.record, "record")?,
        received_at,
    }))
}

fn record_from(value: Option<Value>, field: &str) -> Result<Option<Record>, NormalizationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Record::try_from(value).map(Some).map_err(|other| {
            NormalizationError::MalformedPayload {
                reason: format!("{} is not an object: {}", field, other),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_decode_update_frame() {
        let text = r#"{"type":"UPDATE","table":"payments",
            "record":{"id":"pay-1","status":"overdue"},
            "old_record":{"id":"pay-1","status":"pending"}}"#;
        let now = Utc::now();
        let event = decode_frame(text, &Topic::payments(), now).unwrap().unwrap();

        assert_eq!(event.operation, Operation::Update);
        assert_eq!(event.topic().as_str(), "payments");
        assert_eq!(event.received_at, now);
        assert_eq!(
            event.old_record.as_ref().and_then(|r| r.str_field("status")),
            Some("pending")
        );
        assert_eq!(
            event.new_record.as_ref().and_then(|r| r.str_field("status")),
            Some("overdue")
        );
    }

    #[test]
    fn test_delete_frame_with_null_record() {
        let text = r#"{"type":"DELETE","table":"messages","record":null,"old_record":{"id":4}}"#;
        let event = decode_frame(text, &Topic::messages(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(event.operation, Operation::Delete);
        assert!(event.new_record.is_none());
        assert_eq!(event.old_record.and_then(|r| r.id()), Some("4".to_string()));
    }

    #[test]
    fn test_missing_table_uses_subscription_topic() {
        let text = r#"{"type":"insert","record":{"id":"mr-1"}}"#;
        let event = decode_frame(text, &Topic::maintenance_requests(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(event.topic(), &Topic::maintenance_requests());
    }

    #[test]
    fn test_control_frames_carry_nothing() {
        let text = r#"{"type":"subscribed","topic":"payments"}"#;
        assert!(decode_frame(text, &Topic::payments(), Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_bad_frames_are_errors() {
        let now = Utc::now();
        assert!(matches!(
            decode_frame("not json", &Topic::payments(), now),
            Err(NormalizationError::MalformedPayload { .. })
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"TRUNCATE","table":"payments"}"#, &Topic::payments(), now),
            Err(NormalizationError::UnknownOperation { .. })
        ));
        assert!(matches!(
            decode_frame(r#"{"type":"INSERT","record":[1,2]}"#, &Topic::payments(), now),
            Err(NormalizationError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frame: Value = serde_json::from_str(&subscribe_frame(&Topic::payments())).unwrap();
        assert_eq!(frame["type"], "subscribe");
        assert_eq!(frame["topic"], "payments");
    }
}
