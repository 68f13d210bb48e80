#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use leasewire_core::{ActionRef, ManualClock};
use leasewire_realtime::ReconnectConfig;
use leasewire_storage::InMemoryDurableTier;
use leasewire_sync::{
    AlertSurface, Navigator, Notice, NoticeId, NotificationService, ServiceDeps, ServiceOptions,
};
use leasewire_test_utils::{MockChangeFeed, MockQueryApi};

/// Surface and navigator that remember every call.
#[derive(Default)]
pub struct Recording {
    pub shown: Mutex<Vec<Notice>>,
    pub dismissed: Mutex<Vec<Vec<NoticeId>>>,
    pub routes: Mutex<Vec<String>>,
}

impl Recording {
    pub fn shown_count(&self) -> usize {
        self.shown.lock().unwrap().len()
    }

    pub fn dismissal_batches(&self) -> Vec<Vec<NoticeId>> {
        self.dismissed.lock().unwrap().clone()
    }
}

impl AlertSurface for Recording {
    fn show(&self, notice: &Notice) {
        self.shown.lock().unwrap().push(notice.clone());
    }

    fn dismiss(&self, ids: &[NoticeId]) {
        self.dismissed.lock().unwrap().push(ids.to_vec());
    }
}

impl Navigator for Recording {
    fn navigate(&self, action: &ActionRef) {
        self.routes.lock().unwrap().push(action.to_string());
    }
}

pub struct Harness {
    pub service: NotificationService,
    pub feed: Arc<MockChangeFeed>,
    pub query: Arc<MockQueryApi>,
    pub clock: ManualClock,
    pub recording: Arc<Recording>,
}

pub fn fast_options() -> ServiceOptions {
    ServiceOptions {
        reconnect: ReconnectConfig {
            initial_ms: 5,
            max_ms: 20,
            multiplier: 2.0,
            jitter_ms: 0,
        },
        ..ServiceOptions::default()
    }
}

pub fn harness() -> Harness {
    harness_with(fast_options())
}

pub fn harness_with(options: ServiceOptions) -> Harness {
    let feed = Arc::new(MockChangeFeed::new());
    let query = Arc::new(MockQueryApi::new());
    let clock = ManualClock::starting_now();
    let recording = Arc::new(Recording::default());

    let service = NotificationService::new(
        ServiceDeps {
            feed: feed.clone(),
            query: query.clone(),
            durable: Arc::new(InMemoryDurableTier::new()),
            clock: Arc::new(clock.clone()),
            surface: recording.clone(),
            navigator: recording.clone(),
        },
        options,
    );

    Harness {
        service,
        feed,
        query,
        clock,
        recording,
    }
}
