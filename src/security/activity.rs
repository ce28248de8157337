//! Sliding-activity abuse detection.
//!
//! Counts requests per identity over a fixed window and reports an
//! [`AbuseSignal`] whenever the count passes the abuse threshold. Detection
//! is advisory only: nothing here ever denies a request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::AdmissionConfig;
use crate::security::clock::{Clock, SystemClock};

/// Raised when an identity's request volume exceeds the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbuseSignal {
    pub identity: String,
    pub count: u64,
    pub path: String,
}

/// Point-in-time view of one activity counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub count: u64,
    pub window_age: Duration,
}

#[derive(Debug)]
struct ActivityCounter {
    count: u64,
    window_start: Instant,
}

impl ActivityCounter {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// Reset once the window is strictly exceeded, then count this request.
    fn record(&mut self, window: Duration, now: Instant) -> u64 {
        if now.saturating_duration_since(self.window_start) > window {
            self.count = 0;
            self.window_start = now;
        }
        self.count += 1;
        self.count
    }
}

/// Owns one rolling request counter per client identity.
pub struct ActivityMonitor {
    counters: DashMap<String, ActivityCounter>,
    threshold: u64,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl ActivityMonitor {
    pub fn new(threshold: u64, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            threshold,
            window,
            clock,
        }
    }

    pub fn from_config(config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.abuse_threshold, config.abuse_window(), clock)
    }

    /// Count one request from `identity` and report abuse if over threshold.
    pub fn record(&self, identity: &str, path: &str) -> Option<AbuseSignal> {
        self.record_at(identity, path, self.clock.now())
    }

    pub fn record_at(&self, identity: &str, path: &str, now: Instant) -> Option<AbuseSignal> {
        let count = match self.counters.get_mut(identity) {
            Some(mut counter) => counter.record(self.window, now),
            None => self
                .counters
                .entry(identity.to_string())
                .or_insert_with(|| ActivityCounter::new(now))
                .record(self.window, now),
        };

        (count > self.threshold).then(|| AbuseSignal {
            identity: identity.to_string(),
            count,
            path: path.to_string(),
        })
    }

    /// Current state of `identity`'s counter, without creating one.
    ///
    /// A counter whose window has lapsed still reports its stale count; the
    /// reset only happens on the next recorded request.
    pub fn snapshot(&self, identity: &str) -> Option<ActivitySnapshot> {
        let now = self.clock.now();
        self.counters.get(identity).map(|c| ActivitySnapshot {
            count: c.count,
            window_age: now.saturating_duration_since(c.window_start),
        })
    }

    pub fn tracked_identities(&self) -> usize {
        self.counters.len()
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::from_config(&AdmissionConfig::default(), Arc::new(SystemClock))
    }
}
