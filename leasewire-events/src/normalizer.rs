//! Change event normalization.
//!
//! Each known topic has a rule set: a whitelist of user-relevant fields and
//! one function per operation. Updates that touch no whitelisted field
//! produce nothing, which keeps unrelated column writes from turning into
//! notification storms.

use leasewire_core::{ChangeEvent, DomainAlert, NormalizationError, Operation, Record, Timestamp};
use serde_json::Value;

use crate::rules;

type InsertRule = fn(&Record, Timestamp) -> Result<Vec<DomainAlert>, NormalizationError>;
type UpdateRule = fn(&Record, &Record, Timestamp) -> Result<Vec<DomainAlert>, NormalizationError>;

struct TopicRules {
    topic: &'static str,
    whitelist: &'static [&'static str],
    on_insert: InsertRule,
    on_update: UpdateRule,
}

static TOPIC_RULES: [TopicRules; 3] = [
    TopicRules {
        topic: leasewire_core::Topic::PAYMENTS,
        whitelist: rules::payments::WHITELIST,
        on_insert: rules::payments::on_insert,
        on_update: rules::payments::on_update,
    },
    TopicRules {
        topic: leasewire_core::Topic::MAINTENANCE_REQUESTS,
        whitelist: rules::maintenance::WHITELIST,
        on_insert: rules::maintenance::on_insert,
        on_update: rules::maintenance::on_update,
    },
    TopicRules {
        topic: leasewire_core::Topic::MESSAGES,
        whitelist: rules::messages::WHITELIST,
        on_insert: rules::messages::on_insert,
        on_update: rules::messages::on_update,
    },
];

fn rules_for(topic: &str) -> Option<&'static TopicRules> {
    TOPIC_RULES.iter().find(|rules| rules.topic == topic)
}

/// Fields compared between old and new records for `topic`.
///
/// Unknown topics have no whitelist.
pub fn whitelist_for(topic: &str) -> Option<&'static [&'static str]> {
    rules_for(topic).map(|rules| rules.whitelist)
}

/// Convert one raw change event into zero or more domain alerts.
///
/// Events on unknown topics and deletes yield no alerts. An event missing
/// the record its operation requires is a `NormalizationError`.
pub fn normalize(event: &ChangeEvent) -> Result<Vec<DomainAlert>, NormalizationError> {
    let Some(rules) = rules_for(event.topic().as_str()) else {
        return Ok(Vec::new());
    };

    let (alerts, revision) = match event.operation {
        Operation::Delete => return Ok(Vec::new()),
        Operation::Insert => {
            let new = required(event, event.new_record.as_ref(), "new")?;
            let alerts = (rules.on_insert)(new, event.received_at)?;
            (alerts, revision_of(None, new, rules.whitelist))
        }
        Operation::Update => {
            let old = required(event, event.old_record.as_ref(), "old")?;
            let new = required(event, event.new_record.as_ref(), "new")?;
            if !old.differs_on(new, rules.whitelist) {
                return Ok(Vec::new());
            }
            let alerts = (rules.on_update)(old, new, event.received_at)?;
            (alerts, revision_of(Some(old), new, rules.whitelist))
        }
    };
    Ok(alerts
        .into_iter()
        .map(|alert| alert.with_revision(revision.clone()))
        .collect())
}

/// Row identity plus the whitelisted values (and `updated_at`) the alerts
/// were derived from. Independent of when the event was received.
fn revision_of(old: Option<&Record>, new: &Record, whitelist: &[&str]) -> String {
    let value = |record: &Record, field: &str| record.get(field).map(Value::to_string).unwrap_or_default();

    let mut parts = vec![new.id().unwrap_or_default()];
    for field in whitelist.iter().copied().chain(["updated_at"]) {
        let after = value(new, field);
        match old {
            Some(old) => parts.push(format!("{}={}>{}", field, value(old, field), after)),
            None => parts.push(format!("{}={}", field, after)),
        }
    }
    parts.join(";")
}

fn required<'a>(
    event: &ChangeEvent,
    record: Option<&'a Record>,
    side: &'static str,
) -> Result<&'a Record, NormalizationError> {
    record.ok_or_else(|| NormalizationError::MissingRecord {
        topic: event.topic().to_string(),
        operation: event.operation.to_string(),
        side,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leasewire_core::{AlertKind, Severity, Topic};
    use proptest::prelude::*;

    fn payment(status: &str) -> Record {
        Record::new()
            .with("id", "pay-1")
            .with("status", status)
            .with("amount", 1200)
            .with("due_date", "2024-05-01")
            .with("tenant_name", "Dana Whitfield")
    }

    #[test]
    fn test_pending_to_overdue_raises_one_critical_alert() {
        let event = ChangeEvent::update(
            Topic::payments(),
            payment("pending"),
            payment("overdue"),
            Utc::now(),
        );

        let alerts = normalize(&event).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind(), AlertKind::PaymentOverdue);
        assert_eq!(alerts[0].severity(), Severity::Critical);
        assert_eq!(alerts[0].subject_id(), "pay-1");
        assert_eq!(alerts[0].created_at(), event.received_at);
        assert!(alerts[0].action_ref().is_some());
    }

    #[test]
    fn test_revision_ignores_receipt_time() {
        let first = ChangeEvent::update(Topic::payments(), payment("pending"), payment("overdue"), Utc::now());
        let mut again = first.clone();
        again.received_at = first.received_at + chrono::TimeDelta::milliseconds(5);
        let other = ChangeEvent::update(Topic::payments(), payment("paid"), payment("overdue"), Utc::now());

        let first = normalize(&first).unwrap();
        let again = normalize(&again).unwrap();
        let other = normalize(&other).unwrap();
        assert!(first[0].revision().is_some());
        assert_eq!(first[0].revision(), again[0].revision());
        assert_ne!(first[0].revision(), other[0].revision());
    }

    #[test]
    fn test_non_whitelisted_update_yields_nothing() {
        let old = payment("pending").with("last_viewed_at", "2024-04-01T00:00:00Z");
        let new = payment("pending").with("last_viewed_at", "2024-04-02T00:00:00Z");
        let event = ChangeEvent::update(Topic::payments(), old, new, Utc::now());

        assert!(normalize(&event).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_topic_yields_nothing() {
        let event = ChangeEvent::insert("leases", Record::new().with("id", 1), Utc::now());
        assert!(normalize(&event).unwrap().is_empty());
        assert!(whitelist_for("leases").is_none());
    }

    #[test]
    fn test_delete_yields_nothing() {
        let event = ChangeEvent::delete(Topic::payments(), payment("overdue"), Utc::now());
        assert!(normalize(&event).unwrap().is_empty());
    }

    #[test]
    fn test_update_without_new_record_is_malformed() {
        let mut event = ChangeEvent::update(
            Topic::payments(),
            payment("pending"),
            payment("overdue"),
            Utc::now(),
        );
        event.new_record = None;

        let err = normalize(&event).unwrap_err();
        assert!(matches!(err, NormalizationError::MissingRecord { side: "new", .. }));
    }

    #[test]
    fn test_insert_without_id_is_malformed() {
        let record = Record::new().with("status", "overdue");
        let event = ChangeEvent::insert(Topic::payments(), record, Utc::now());

        let err = normalize(&event).unwrap_err();
        assert!(matches!(err, NormalizationError::MissingField { ref field, .. } if field == "id"));
    }

    fn arb_value() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            "[a-z_]{1,12}".prop_map(serde_json::Value::from),
            any::<i32>().prop_map(serde_json::Value::from),
            any::<bool>().prop_map(serde_json::Value::from),
        ]
    }

    fn arb_topic() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just(Topic::PAYMENTS),
            Just(Topic::MAINTENANCE_REQUESTS),
            Just(Topic::MESSAGES),
        ]
    }

    proptest! {
        #[test]
        fn whitelist_equal_updates_never_alert(
            topic in arb_topic(),
            shared in proptest::collection::vec(arb_value(), 3),
            old_noise in proptest::collection::btree_map("[a-z]{3,8}_x", arb_value(), 0..5),
            new_noise in proptest::collection::btree_map("[a-z]{3,8}_x", arb_value(), 0..5),
        ) {
            let whitelist = whitelist_for(topic).unwrap();
            let mut old = Record::new().with("id", "r-1");
            let mut new = Record::new().with("id", "r-1");
            for (field, value) in whitelist.iter().zip(shared.iter()) {
                old = old.with(*field, value.clone());
                new = new.with(*field, value.clone());
            }
            for (field, value) in old_noise {
                old = old.with(field, value);
            }
            for (field, value) in new_noise {
                new = new.with(field, value);
            }

            let event = ChangeEvent::update(topic, old, new, Utc::now());
            prop_assert!(normalize(&event).unwrap().is_empty());
        }
    }
}
