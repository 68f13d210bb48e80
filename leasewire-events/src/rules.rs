//! Per-topic business rules.

use leasewire_core::{NormalizationError, Record};

fn require_id(topic: &str, record: &Record) -> Result<String, NormalizationError> {
    record.id().ok_or_else(|| NormalizationError::MissingField {
        topic: topic.to_string(),
        field: "id".to_string(),
    })
}

fn status_of(record: &Record) -> Option<String> {
    record.str_field("status").map(|s| s.to_ascii_lowercase())
}

pub(crate) mod payments {
    use leasewire_core::{
        ActionRef, AlertKind, DomainAlert, NormalizationError, Record, Timestamp, Topic,
    };

    use super::{require_id, status_of};

    pub const WHITELIST: &[&str] = &["status", "amount", "due_date"];

    const OVERDUE: &str = "overdue";
    const PAID: &str = "paid";

    fn describe(record: &Record, id: &str) -> String {
        let who = record
            .str_field("tenant_name")
            .or_else(|| record.str_field("unit_label"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("payment {}", id));
        match record.get("amount").and_then(serde_json::Value::as_f64) {
            Some(amount) => format!("{} ({:.2})", who, amount),
            None => who,
        }
    }

    fn alert(kind: AlertKind, id: &str, title: String, at: Timestamp) -> DomainAlert {
        DomainAlert::new(kind, id, title, at).with_action(ActionRef::new(format!("/payments/{}", id)))
    }

    pub fn on_insert(record: &Record, at: Timestamp) -> Result<Vec<DomainAlert>, NormalizationError> {
        let id = require_id(Topic::PAYMENTS, record)?;
        if status_of(record).as_deref() == Some(OVERDUE) {
            let title = format!("Payment overdue: {}", describe(record, &id));
            return Ok(vec![alert(AlertKind::PaymentOverdue, &id, title, at)]);
        }
        Ok(Vec::new())
    }

    pub fn on_update(
        old: &Record,
        new: &Record,
        at: Timestamp,
    ) -> Result<Vec<DomainAlert>, NormalizationError> {
        let id = require_id(Topic::PAYMENTS, new)?;
        let old_status = status_of(old);
        let new_status = status_of(new);
        let status_changed = old_status != new_status;
        let terms_changed = old.differs_on(new, &["amount", "due_date"]);

        let mut alerts = Vec::new();
        match new_status.as_deref() {
            Some(OVERDUE) if status_changed => {
                let title = format!("Payment overdue: {}", describe(new, &id));
                alerts.push(alert(AlertKind::PaymentOverdue, &id, title, at));
            }
            Some(PAID) if status_changed => {
                let title = format!("Payment received: {}", describe(new, &id));
                alerts.push(alert(AlertKind::PaymentReceived, &id, title, at));
            }
            _ if status_changed => {
                let title = format!("Payment updated: {}", describe(new, &id));
                alerts.push(alert(AlertKind::PaymentAdjusted, &id, title, at));
                return Ok(alerts);
            }
            _ => {}
        }

        if terms_changed {
            let title = format!("Payment terms changed: {}", describe(new, &id));
            alerts.push(alert(AlertKind::PaymentAdjusted, &id, title, at));
        }
        Ok(alerts)
    }
}

pub(crate) mod maintenance {
    use leasewire_core::{
        ActionRef, AlertKind, DomainAlert, NormalizationError, Record, Timestamp, Topic,
    };

    use super::{require_id, status_of};

    pub const WHITELIST: &[&str] = &["status", "priority"];

    fn is_urgent(record: &Record) -> bool {
        record
            .str_field("priority")
            .map(|p| p.eq_ignore_ascii_case("urgent") || p.eq_ignore_ascii_case("emergency"))
            .unwrap_or(false)
    }

    fn describe(record: &Record, id: &str) -> String {
        let what = record
            .str_field("title")
            .or_else(|| record.str_field("category"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("request {}", id));
        match record.str_field("property_name") {
            Some(property) => format!("{} at {}", what, property),
            None => what,
        }
    }

    fn alert(kind: AlertKind, id: &str, title: String, at: Timestamp) -> DomainAlert {
        DomainAlert::new(kind, id, title, at)
            .with_action(ActionRef::new(format!("/maintenance/{}", id)))
    }

    pub fn on_insert(record: &Record, at: Timestamp) -> Result<Vec<DomainAlert>, NormalizationError> {
        let id = require_id(Topic::MAINTENANCE_REQUESTS, record)?;
        let alert = if is_urgent(record) {
            let title = format!("Urgent maintenance: {}", describe(record, &id));
            alert(AlertKind::MaintenanceUrgent, &id, title, at)
        } else {
            let title = format!("New maintenance request: {}", describe(record, &id));
            alert(AlertKind::MaintenanceRequested, &id, title, at)
        };
        Ok(vec![alert])
    }

    pub fn on_update(
        old: &Record,
        new: &Record,
        at: Timestamp,
    ) -> Result<Vec<DomainAlert>, NormalizationError> {
        let id = require_id(Topic::MAINTENANCE_REQUESTS, new)?;
        let mut alerts = Vec::new();

        let new_status = status_of(new);
        if status_of(old) != new_status {
            let status = new_status.unwrap_or_else(|| "unknown".to_string());
            let title = format!("Maintenance {} is now {}", describe(new, &id), status);
            alerts.push(alert(AlertKind::MaintenanceStatusChanged, &id, title, at));
        }

        if is_urgent(new) && !is_urgent(old) {
            let title = format!("Maintenance escalated: {}", describe(new, &id));
            alerts.push(alert(AlertKind::MaintenanceUrgent, &id, title, at));
        }

        Ok(alerts)
    }
}

pub(crate) mod messages {
    use leasewire_core::{
        ActionRef, AlertKind, DomainAlert, NormalizationError, Record, Timestamp, Topic,
    };

    use super::require_id;

    /// Message edits and read receipts never alert.
    pub const WHITELIST: &[&str] = &[];

    fn from_tenant(record: &Record) -> bool {
        record
            .str_field("sender_type")
            .or_else(|| record.str_field("sender_role"))
            .map(|s| s.eq_ignore_ascii_case("tenant"))
            .unwrap_or(false)
    }

    pub fn on_insert(record: &Record, at: Timestamp) -> Result<Vec<DomainAlert>, NormalizationError> {
        let id = require_id(Topic::MESSAGES, record)?;
        if !from_tenant(record) {
            return Ok(Vec::new());
        }

        // Messages in one conversation share a subject so they collapse into one notice.
        let subject = record
            .str_field("conversation_id")
            .map(str::to_string)
            .unwrap_or(id);
        let sender = record.str_field("sender_name").unwrap_or("a tenant");
        let title = format!("New message from {}", sender);

        let alert = DomainAlert::new(AlertKind::MessageFromTenant, subject.as_str(), title, at)
            .with_action(ActionRef::new(format!("/messages/{}", subject)));
        Ok(vec![alert])
    }

    pub fn on_update(
        _old: &Record,
        _new: &Record,
        _at: Timestamp,
    ) -> Result<Vec<DomainAlert>, NormalizationError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use leasewire_core::{AlertKind, Record};

    use super::*;

    fn request(status: &str, priority: &str) -> Record {
        Record::new()
            .with("id", "mr-7")
            .with("status", status)
            .with("priority", priority)
            .with("title", "Leaking sink")
            .with("property_name", "Maple Court")
    }

    #[test]
    fn test_maintenance_status_and_escalation_yield_two_alerts() {
        let alerts = maintenance::on_update(
            &request("open", "normal"),
            &request("in_progress", "urgent"),
            Utc::now(),
        )
        .unwrap();

        let kinds: Vec<_> = alerts.iter().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec![AlertKind::MaintenanceStatusChanged, AlertKind::MaintenanceUrgent]
        );
        assert!(alerts[0].title().contains("in_progress"));
        assert_eq!(
            alerts[1].action_ref().map(|a| a.as_str()),
            Some("/maintenance/mr-7")
        );
    }

    #[test]
    fn test_maintenance_priority_downgrade_is_silent() {
        let alerts = maintenance::on_update(
            &request("open", "emergency"),
            &request("open", "normal"),
            Utc::now(),
        )
        .unwrap();
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_maintenance_insert_urgent_vs_routine() {
        let urgent = maintenance::on_insert(&request("open", "Emergency"), Utc::now()).unwrap();
        assert_eq!(urgent[0].kind(), AlertKind::MaintenanceUrgent);

        let routine = maintenance::on_insert(&request("open", "low"), Utc::now()).unwrap();
        assert_eq!(routine[0].kind(), AlertKind::MaintenanceRequested);
        assert!(routine[0].title().contains("Maple Court"));
    }

    #[test]
    fn test_payment_paid_and_adjusted() {
        let pending = Record::new()
            .with("id", "pay-2")
            .with("status", "pending")
            .with("amount", 900);
        let paid = pending.clone().with("status", "PAID");
        let alerts = payments::on_update(&pending, &paid, Utc::now()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind(), AlertKind::PaymentReceived);

        let late_fee = pending.clone().with("amount", 950);
        let alerts = payments::on_update(&pending, &late_fee, Utc::now()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind(), AlertKind::PaymentAdjusted);
    }

    #[test]
    fn test_payment_overdue_with_late_fee_yields_both() {
        let pending = Record::new()
            .with("id", "pay-3")
            .with("status", "pending")
            .with("amount", 900);
        let overdue = pending.clone().with("status", "overdue").with("amount", 950);

        let kinds: Vec<_> = payments::on_update(&pending, &overdue, Utc::now())
            .unwrap()
            .iter()
            .map(|a| a.kind())
            .collect();
        assert_eq!(kinds, vec![AlertKind::PaymentOverdue, AlertKind::PaymentAdjusted]);
    }

    #[test]
    fn test_payment_insert_only_alerts_when_overdue() {
        let pending = Record::new().with("id", "pay-4").with("status", "pending");
        assert!(payments::on_insert(&pending, Utc::now()).unwrap().is_empty());

        let overdue = pending.with("status", "overdue");
        let alerts = payments::on_insert(&overdue, Utc::now()).unwrap();
        assert_eq!(alerts[0].kind(), AlertKind::PaymentOverdue);
        assert!(alerts[0].title().contains("payment pay-4"));
    }

    #[test]
    fn test_tenant_message_collapses_by_conversation() {
        let message = Record::new()
            .with("id", "msg-1")
            .with("conversation_id", "conv-9")
            .with("sender_type", "tenant")
            .with("sender_name", "Ravi");
        let alerts = messages::on_insert(&message, Utc::now()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subject_id(), "conv-9");
        assert_eq!(alerts[0].title(), "New message from Ravi");
        assert_eq!(alerts[0].action_ref().map(|a| a.as_str()), Some("/messages/conv-9"));
    }

    #[test]
    fn test_manager_message_is_silent() {
        let message = Record::new()
            .with("id", "msg-2")
            .with("sender_type", "manager");
        assert!(messages::on_insert(&message, Utc::now()).unwrap().is_empty());
    }
}
