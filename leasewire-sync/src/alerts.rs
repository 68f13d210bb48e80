//! Alert delivery and action routing.
//!
//! The [`AlertCenter`] owns the set of visible notices. It suppresses a
//! second notice for the same `(kind, subject_id)` while the first is still
//! visible, ignores redelivery of an alert that was already acknowledged,
//! and routes a selected notice to its action through the host
//! [`Navigator`].
//!
//! State changes queue their surface calls in an outbox under the state
//! lock. The calls run after the lock is released, one flusher at a time,
//! so a surface may call back into the center.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use leasewire_core::{ActionRef, AlertKind, Clock, DomainAlert, Severity, Timestamp};
use uuid::Uuid;

/// Default number of acknowledged alerts remembered for idempotent redelivery.
pub const DEFAULT_ACK_MEMORY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoticeId(Uuid);

impl NoticeId {
    fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for NoticeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A visible, user-facing alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: NoticeId,
    pub alert: DomainAlert,
    pub shown_at: Timestamp,
}

/// UI sink for notices.
pub trait AlertSurface: Send + Sync + 'static {
    fn show(&self, notice: &Notice);
    /// Called once per dismissal batch.
    fn dismiss(&self, ids: &[NoticeId]);
}

/// Host navigation. The route is opaque to this crate.
pub trait Navigator: Send + Sync + 'static {
    fn navigate(&self, action: &ActionRef);
}

/// Surface that logs notices, for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSurface;

impl AlertSurface for TracingSurface {
    fn show(&self, notice: &Notice) {
        let alert = &notice.alert;
        match alert.severity() {
            Severity::Critical | Severity::Warning => tracing::warn!(
                notice = %notice.id,
                kind = alert.kind().as_str(),
                subject = alert.subject_id(),
                "{}",
                alert.title()
            ),
            Severity::Info => tracing::info!(
                notice = %notice.id,
                kind = alert.kind().as_str(),
                subject = alert.subject_id(),
                "{}",
                alert.title()
            ),
        }
    }

    fn dismiss(&self, ids: &[NoticeId]) {
        tracing::info!(count = ids.len(), "Notices dismissed");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate(&self, action: &ActionRef) {
        tracing::info!(route = %action, "Navigate");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Shown(NoticeId),
    /// A notice for the same kind and subject is already visible.
    Suppressed(NoticeId),
    /// This exact alert was delivered and acknowledged before.
    AlreadyAcknowledged,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    #[error("No visible notice with id {0}")]
    UnknownNotice(NoticeId),
    #[error("Notice {0} has no action to route to")]
    NoAction(NoticeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Occurrence {
    /// Row state the alert was derived from.
    Revision(String),
    /// Alerts built without a revision fall back to their timestamp.
    CreatedAt(Timestamp),
}

/// Identity of one concrete alert, used to recognise redelivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fingerprint {
    kind: AlertKind,
    subject_id: String,
    occurrence: Occurrence,
}

impl Fingerprint {
    fn of(alert: &DomainAlert) -> Self {
        let occurrence = match alert.revision() {
            Some(revision) => Occurrence::Revision(revision.to_string()),
            None => Occurrence::CreatedAt(alert.created_at()),
        };
        Self {
            kind: alert.kind(),
            subject_id: alert.subject_id().to_string(),
            occurrence,
        }
    }
}

/// Bounded FIFO set of acknowledged fingerprints.
#[derive(Debug)]
struct AckMemory {
    capacity: usize,
    order: VecDeque<Fingerprint>,
    members: HashSet<Fingerprint>,
}

impl AckMemory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.members.contains(fingerprint)
    }

    fn remember(&mut self, fingerprint: Fingerprint) {
        if !self.members.insert(fingerprint.clone()) {
            return;
        }
        self.order.push_back(fingerprint);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

#[derive(Debug)]
enum SurfaceCall {
    Show(Notice),
    Dismiss(Vec<NoticeId>),
}

#[derive(Debug)]
struct State {
    visible: Vec<Notice>,
    acknowledged: AckMemory,
    outbox: VecDeque<SurfaceCall>,
    flushing: bool,
}

impl State {
    fn take(&mut self, id: NoticeId) -> Option<Notice> {
        let index = self.visible.iter().position(|notice| notice.id == id)?;
        let notice = self.visible.remove(index);
        self.acknowledged.remember(Fingerprint::of(&notice.alert));
        Some(notice)
    }
}

/// Visible notices plus the surface and navigator they are shown through.
///
/// The surface sees shows and dismissals in the order the state changed.
/// A call made while another thread is flushing returns once its surface
/// calls are queued; that thread delivers them.
pub struct AlertCenter {
    state: Mutex<State>,
    surface: Arc<dyn AlertSurface>,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for AlertCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertCenter")
            .field("visible", &self.visible_count())
            .finish_non_exhaustive()
    }
}

impl AlertCenter {
    pub fn new(
        surface: Arc<dyn AlertSurface>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
        ack_memory: usize,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                visible: Vec::new(),
                acknowledged: AckMemory::new(ack_memory),
                outbox: VecDeque::new(),
                flushing: false,
            }),
            surface,
            navigator,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run queued surface calls outside the state lock. Returns at once if
    /// another caller is already flushing, including a surface calling back
    /// in from `show` or `dismiss`.
    fn flush(&self) {
        {
            let mut state = self.lock();
            if state.flushing {
                return;
            }
            state.flushing = true;
        }
        let mut guard = FlushGuard {
            center: self,
            armed: true,
        };

        loop {
            let call = {
                let mut state = self.lock();
                match state.outbox.pop_front() {
                    Some(call) => call,
                    None => {
                        state.flushing = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            match call {
                SurfaceCall::Show(notice) => self.surface.show(&notice),
                SurfaceCall::Dismiss(ids) => self.surface.dismiss(&ids),
            }
        }
    }

    pub fn deliver(&self, alert: DomainAlert) -> DeliveryOutcome {
        let outcome = self.record_delivery(alert);
        self.flush();
        outcome
    }

    fn record_delivery(&self, alert: DomainAlert) -> DeliveryOutcome {
        let mut state = self.lock();

        if state.acknowledged.contains(&Fingerprint::of(&alert)) {
            tracing::debug!(kind = alert.kind().as_str(), subject = alert.subject_id(), "Alert already acknowledged");
            return DeliveryOutcome::AlreadyAcknowledged;
        }
        if let Some(existing) = state
            .visible
            .iter()
            .find(|notice| notice.alert.dedup_key() == alert.dedup_key())
        {
            tracing::debug!(
                kind = alert.kind().as_str(),
                subject = alert.subject_id(),
                notice = %existing.id,
                "Duplicate alert suppressed"
            );
            return DeliveryOutcome::Suppressed(existing.id);
        }

        let notice = Notice {
            id: NoticeId::generate(),
            alert,
            shown_at: self.clock.now(),
        };
        let id = notice.id;
        state.outbox.push_back(SurfaceCall::Show(notice.clone()));
        state.visible.push(notice);
        DeliveryOutcome::Shown(id)
    }

    /// Dismiss the notice and navigate to its action.
    pub fn select_action(&self, id: NoticeId) -> Result<ActionRef, AlertError> {
        let action = {
            let mut state = self.lock();
            let notice = state.take(id).ok_or(AlertError::UnknownNotice(id))?;
            state.outbox.push_back(SurfaceCall::Dismiss(vec![id]));
            notice.alert.action_ref().cloned()
        };
        self.flush();

        let action = action.ok_or(AlertError::NoAction(id))?;
        self.navigator.navigate(&action);
        Ok(action)
    }

    pub fn acknowledge(&self, id: NoticeId) -> bool {
        {
            let mut state = self.lock();
            if state.take(id).is_none() {
                return false;
            }
            state.outbox.push_back(SurfaceCall::Dismiss(vec![id]));
        }
        self.flush();
        true
    }

    /// Acknowledge every visible notice of `kind` in one step.
    ///
    /// The surface receives a single dismissal for the whole batch.
    pub fn acknowledge_kind(&self, kind: AlertKind) -> Vec<NoticeId> {
        let ids: Vec<NoticeId> = {
            let mut state = self.lock();
            let ids: Vec<NoticeId> = state
                .visible
                .iter()
                .filter(|notice| notice.alert.kind() == kind)
                .map(|notice| notice.id)
                .collect();
            if ids.is_empty() {
                return ids;
            }
            for id in &ids {
                state.take(*id);
            }
            state.outbox.push_back(SurfaceCall::Dismiss(ids.clone()));
            ids
        };
        self.flush();
        tracing::debug!(kind = kind.as_str(), count = ids.len(), "Acknowledged alerts by kind");
        ids
    }

    /// Visible notices, oldest first.
    pub fn visible(&self) -> Vec<Notice> {
        self.lock().visible.clone()
    }

    pub fn visible_count(&self) -> usize {
        self.lock().visible.len()
    }

    pub fn unacknowledged_by_kind(&self) -> BTreeMap<AlertKind, usize> {
        let mut counts = BTreeMap::new();
        for notice in &self.lock().visible {
            *counts.entry(notice.alert.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Clears the flushing flag if a surface call panics.
struct FlushGuard<'a> {
    center: &'a AlertCenter,
    armed: bool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.center.lock().flushing = false;
        }
    }
}
