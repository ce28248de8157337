//! Per-identity token buckets.
//!
//! Each bucket holds up to `capacity` tokens and is topped back up to full
//! once per refill window. Refill is computed on access; idle identities cost
//! nothing between requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::AdmissionConfig;
use crate::security::clock::{Clock, SystemClock};

const MIN_REFILL_WINDOW: Duration = Duration::from_nanos(1);

/// Outcome of a single token acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A token was consumed; `remaining` tokens are left in this window.
    Admitted { remaining: u32 },
    /// The bucket is empty until the next refill, `retry_after` from now.
    Denied { retry_after: Duration },
}

impl Acquire {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Acquire::Admitted { .. })
    }
}

/// Point-in-time view of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub tokens: u32,
    pub capacity: u32,
}

/// A fixed-interval token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Restore full capacity if at least one window has passed.
    ///
    /// The refill point advances by whole windows so refills stay aligned to
    /// the bucket's creation time.
    fn refill(&mut self, capacity: u32, window: Duration, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed < window {
            return;
        }
        let windows = (elapsed.as_nanos() / window.as_nanos()).min(u32::MAX as u128) as u32;
        self.last_refill += window * windows;
        self.tokens = capacity;
    }

    fn try_acquire(&mut self, capacity: u32, window: Duration, now: Instant) -> Acquire {
        self.refill(capacity, window, now);

        if self.tokens > 0 {
            self.tokens -= 1;
            Acquire::Admitted {
                remaining: self.tokens,
            }
        } else {
            let next_refill = self.last_refill + window;
            Acquire::Denied {
                retry_after: next_refill.saturating_duration_since(now),
            }
        }
    }
}

/// Owns one token bucket per client identity.
///
/// Buckets are created lazily on first sight of an identity and live for the
/// lifetime of the registry. The map is sharded; the shard lock held by a
/// `DashMap` entry makes get-or-create and consume a single atomic step.
pub struct TokenBucketRegistry {
    buckets: DashMap<String, TokenBucket>,
    capacity: u32,
    refill_window: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenBucketRegistry {
    /// A zero `refill_window` is raised to one nanosecond, so the bucket refills
    /// whenever the clock has moved.
    pub fn new(capacity: u32, refill_window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            refill_window: refill_window.max(MIN_REFILL_WINDOW),
            clock,
        }
    }

    pub fn from_config(config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.bucket_capacity, config.refill_window(), clock)
    }

    /// Try to consume one token for `identity`. Denial leaves state untouched.
    pub fn try_admit(&self, identity: &str) -> bool {
        self.acquire(identity).is_admitted()
    }

    pub fn acquire(&self, identity: &str) -> Acquire {
        self.acquire_at(identity, self.clock.now())
    }

    pub fn acquire_at(&self, identity: &str, now: Instant) -> Acquire {
        let (capacity, window) = (self.capacity, self.refill_window);

        // Fast path avoids allocating the key for known identities.
        if let Some(mut bucket) = self.buckets.get_mut(identity) {
            return bucket.try_acquire(capacity, window, now);
        }

        self.buckets
            .entry(identity.to_string())
            .or_insert_with(|| TokenBucket::new(capacity, now))
            .try_acquire(capacity, window, now)
    }

    /// Current state of `identity`'s bucket, without creating one.
    pub fn snapshot(&self, identity: &str) -> Option<BucketSnapshot> {
        let now = self.clock.now();
        let mut bucket = self.buckets.get_mut(identity)?;
        bucket.refill(self.capacity, self.refill_window, now);
        Some(BucketSnapshot {
            tokens: bucket.tokens,
            capacity: self.capacity,
        })
    }

    pub fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_window(&self) -> Duration {
        self.refill_window
    }
}

impl Default for TokenBucketRegistry {
    fn default() -> Self {
        Self::from_config(&AdmissionConfig::default(), Arc::new(SystemClock))
    }
}
