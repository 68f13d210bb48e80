//! Alert routing and cache invalidation planning.

use std::collections::BTreeSet;

use leasewire_core::{AlertKind, DomainAlert, KeyPattern};

use crate::keys;

/// Outcome of dispatching a batch of alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Alerts that should reach the user-facing surface.
    pub deliver: Vec<DomainAlert>,
    /// Cache patterns that are now stale.
    pub invalidate: BTreeSet<KeyPattern>,
    /// Alerts that invalidated data but are not surfaced.
    pub suppressed: usize,
}

impl Dispatch {
    pub fn is_empty(&self) -> bool {
        self.deliver.is_empty() && self.invalidate.is_empty()
    }
}

/// Decides which alerts are surfaced and which cache keys they make stale.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    surfaced: BTreeSet<AlertKind>,
}

impl Default for AlertDispatcher {
    /// Everything except routine payment bookkeeping.
    fn default() -> Self {
        Self::new(AlertKind::ALL.into_iter().filter(|kind| {
            !matches!(kind, AlertKind::PaymentReceived | AlertKind::PaymentAdjusted)
        }))
    }
}

impl AlertDispatcher {
    pub fn new(surfaced: impl IntoIterator<Item = AlertKind>) -> Self {
        Self {
            surfaced: surfaced.into_iter().collect(),
        }
    }

    pub fn is_surfaced(&self, kind: AlertKind) -> bool {
        self.surfaced.contains(&kind)
    }

    pub fn surfaced_kinds(&self) -> impl Iterator<Item = AlertKind> + '_ {
        self.surfaced.iter().copied()
    }

    /// Split alerts into deliveries and invalidations.
    ///
    /// Every alert invalidates, surfaced or not.
    pub fn dispatch(&self, alerts: Vec<DomainAlert>) -> Dispatch {
        let mut out = Dispatch::default();
        for alert in alerts {
            out.invalidate.extend(Self::invalidations_for(&alert));
            if self.is_surfaced(alert.kind()) {
                out.deliver.push(alert);
            } else {
                tracing::debug!(
                    kind = %alert.kind(),
                    subject = alert.subject_id(),
                    "Alert kind not surfaced"
                );
                out.suppressed += 1;
            }
        }
        out
    }

    /// Cache patterns made stale by one alert.
    pub fn invalidations_for(alert: &DomainAlert) -> Vec<KeyPattern> {
        match alert.kind() {
            AlertKind::PaymentOverdue => vec![
                KeyPattern::exact(keys::payments_overdue()),
                KeyPattern::exact(keys::payments_summary()),
                KeyPattern::exact(keys::payment(alert.subject_id())),
            ],
            AlertKind::PaymentReceived | AlertKind::PaymentAdjusted => {
                vec![keys::all_payments()]
            }
            AlertKind::MessageFromTenant => vec![keys::all_messages()],
            AlertKind::MaintenanceRequested
            | AlertKind::MaintenanceUrgent
            | AlertKind::MaintenanceStatusChanged => vec![keys::all_maintenance()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize;
    use chrono::Utc;
    use leasewire_core::{ChangeEvent, Record, Topic};

    fn alert(kind: AlertKind, subject: &str) -> DomainAlert {
        DomainAlert::new(kind, subject, "title", Utc::now())
    }

    #[test]
    fn test_default_hides_payment_bookkeeping() {
        let dispatcher = AlertDispatcher::default();
        assert!(!dispatcher.is_surfaced(AlertKind::PaymentReceived));
        assert!(!dispatcher.is_surfaced(AlertKind::PaymentAdjusted));
        assert!(dispatcher.is_surfaced(AlertKind::PaymentOverdue));
        assert!(dispatcher.is_surfaced(AlertKind::MaintenanceStatusChanged));
        assert_eq!(dispatcher.surfaced_kinds().count(), 5);
    }

    #[test]
    fn test_overdue_invalidates_exact_keys() {
        let dispatch = AlertDispatcher::default()
            .dispatch(vec![alert(AlertKind::PaymentOverdue, "pay-1")]);

        assert_eq!(dispatch.deliver.len(), 1);
        let expected: BTreeSet<_> = [
            KeyPattern::exact("payments:overdue"),
            KeyPattern::exact("payments:summary"),
            KeyPattern::exact("payments:pay-1"),
        ]
        .into_iter()
        .collect();
        assert_eq!(dispatch.invalidate, expected);
    }

    #[test]
    fn test_hidden_kind_still_invalidates() {
        let dispatch = AlertDispatcher::default()
            .dispatch(vec![alert(AlertKind::PaymentReceived, "pay-2")]);

        assert!(dispatch.deliver.is_empty());
        assert_eq!(dispatch.suppressed, 1);
        assert!(dispatch.invalidate.contains(&KeyPattern::prefix("payments:")));
        assert!(!dispatch.is_empty());
    }

    #[test]
    fn test_patterns_are_deduplicated() {
        let dispatch = AlertDispatcher::default().dispatch(vec![
            alert(AlertKind::MaintenanceStatusChanged, "mr-1"),
            alert(AlertKind::MaintenanceUrgent, "mr-1"),
            alert(AlertKind::MaintenanceRequested, "mr-2"),
        ]);
        assert_eq!(dispatch.deliver.len(), 3);
        assert_eq!(dispatch.invalidate.len(), 1);
    }

    #[test]
    fn test_unrelated_updates_produce_nothing() {
        let dispatcher = AlertDispatcher::default();
        let mut deliveries = 0;
        let mut invalidations = 0;

        for i in 0..50 {
            let old = Record::new()
                .with("id", format!("mr-{}", i))
                .with("status", "open")
                .with("priority", "normal")
                .with("notes", "before");
            let new = old.clone().with("notes", format!("after {}", i));
            let event = ChangeEvent::update(Topic::maintenance_requests(), old, new, Utc::now());

            let dispatch = dispatcher.dispatch(normalize(&event).unwrap());
            deliveries += dispatch.deliver.len();
            invalidations += dispatch.invalidate.len();
        }

        assert_eq!(deliveries, 0);
        assert_eq!(invalidations, 0);
    }
}
