//! Normalized domain alerts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Closed set of business events the sync layer can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PaymentOverdue,
    PaymentReceived,
    PaymentAdjusted,
    MessageFromTenant,
    MaintenanceRequested,
    MaintenanceUrgent,
    MaintenanceStatusChanged,
}

impl AlertKind {
    pub const ALL: [AlertKind; 7] = [
        AlertKind::PaymentOverdue,
        AlertKind::PaymentReceived,
        AlertKind::PaymentAdjusted,
        AlertKind::MessageFromTenant,
        AlertKind::MaintenanceRequested,
        AlertKind::MaintenanceUrgent,
        AlertKind::MaintenanceStatusChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentOverdue => "payment_overdue",
            Self::PaymentReceived => "payment_received",
            Self::PaymentAdjusted => "payment_adjusted",
            Self::MessageFromTenant => "message_from_tenant",
            Self::MaintenanceRequested => "maintenance_requested",
            Self::MaintenanceUrgent => "maintenance_urgent",
            Self::MaintenanceStatusChanged => "maintenance_status_changed",
        }
    }

    /// Severity every alert of this kind is raised with.
    pub fn severity(&self) -> Severity {
        match self {
            Self::PaymentOverdue | Self::MaintenanceUrgent => Severity::Critical,
            Self::MessageFromTenant => Severity::Warning,
            Self::PaymentReceived
            | Self::PaymentAdjusted
            | Self::MaintenanceRequested
            | Self::MaintenanceStatusChanged => Severity::Info,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        })
    }
}

/// Opaque route descriptor consumed by the host application's router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionRef(String);

impl ActionRef {
    pub fn new(route: impl Into<String>) -> Self {
        Self(route.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized, typed business event.
///
/// Fields are read-only once built; alerts are created by the normalizer
/// and discarded by delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAlert {
    kind: AlertKind,
    severity: Severity,
    subject_id: String,
    title: String,
    created_at: Timestamp,
    action_ref: Option<ActionRef>,
    /// Identifies the row state the alert was derived from. Redelivery of
    /// the same row change carries the same revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision: Option<String>,
}

impl DomainAlert {
    /// Create an alert. Severity follows the kind.
    pub fn new(
        kind: AlertKind,
        subject_id: impl Into<String>,
        title: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            subject_id: subject_id.into(),
            title: title.into(),
            created_at,
            action_ref: None,
            revision: None,
        }
    }

    pub fn with_action(mut self, action_ref: ActionRef) -> Self {
        self.action_ref = Some(action_ref);
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn kind(&self) -> AlertKind {
        self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn action_ref(&self) -> Option<&ActionRef> {
        self.action_ref.as_ref()
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Identity used to suppress duplicates while an alert is visible.
    pub fn dedup_key(&self) -> (AlertKind, &str) {
        (self.kind, self.subject_id.as_str())
    }
}
