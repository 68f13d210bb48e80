//! Reconnect backoff.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

/// Exponential backoff settings for change-feed reconnects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

/// Backoff state for one connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    current_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_ms = config.initial_ms;
        Self {
            config,
            current_ms,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; grows the base delay for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = jittered_backoff(self.current_ms, self.config.jitter_ms);
        let next = (self.current_ms as f64 * self.config.multiplier) as u64;
        self.current_ms = next.clamp(self.config.initial_ms, self.config.max_ms.max(self.config.initial_ms));
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay)
    }

    /// Back to the initial delay after a successful connect.
    pub fn reset(&mut self) {
        self.current_ms = self.config.initial_ms;
        self.attempt = 0;
    }

    /// Consecutive failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// `base_ms` plus up to `jitter_ms` of clock-derived jitter.
pub fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}
