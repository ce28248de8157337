//! Admission decision for inbound requests.
//!
//! # Data Flow
//! ```text
//! headers, method, path
//!     → identity.rs (resolve client identity)
//!     → activity.rs (record, may raise an abuse signal; never blocks)
//!     → rate_limit.rs (consume one token)
//!     → Decision::Admit | Decision::Deny
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};

use crate::config::AdmissionConfig;
use crate::observability::metrics;
use crate::security::activity::{AbuseSignal, ActivityMonitor};
use crate::security::clock::{Clock, SystemClock};
use crate::security::identity::resolve_identity;
use crate::security::rate_limit::{Acquire, TokenBucketRegistry};

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RateLimitExceeded { retry_after: Duration },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::RateLimitExceeded { .. } => write!(f, "rate limit exceeded"),
        }
    }
}

/// Outcome of [`AdmissionFilter::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Per-identity rate limiter plus abuse detector.
///
/// One instance is shared (via `Arc`) by every request worker. The two
/// registries are independent: abuse detection only observes, the token
/// bucket alone decides.
pub struct AdmissionFilter {
    buckets: TokenBucketRegistry,
    activity: ActivityMonitor,
    enabled: bool,
}

impl AdmissionFilter {
    pub fn new(config: &AdmissionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: TokenBucketRegistry::from_config(config, clock.clone()),
            activity: ActivityMonitor::from_config(config, clock),
            enabled: config.enabled,
        }
    }

    /// A filter that admits everything and keeps no state.
    pub fn disabled() -> Self {
        Self::new(&AdmissionConfig {
            enabled: false,
            ..AdmissionConfig::default()
        })
    }

    /// Decide whether a request may proceed.
    pub fn evaluate(&self, headers: &HeaderMap, path: &str) -> Decision {
        self.admit(None, headers, path)
    }

    /// [`evaluate`](Self::evaluate) with the request method in the access log.
    pub fn evaluate_request(&self, method: &Method, headers: &HeaderMap, path: &str) -> Decision {
        self.admit(Some(method), headers, path)
    }

    fn admit(&self, method: Option<&Method>, headers: &HeaderMap, path: &str) -> Decision {
        if !self.enabled {
            return Decision::Admit;
        }
        let identity = resolve_identity(headers);
        tracing::info!(identity = %identity, method = method.map(Method::as_str), path = %path, "Activity");
        self.decide(&identity, path)
    }

    fn decide(&self, identity: &str, path: &str) -> Decision {
        if let Some(signal) = self.activity.record(identity, path) {
            self.report_abuse(&signal);
        }

        match self.buckets.acquire(identity) {
            Acquire::Admitted { remaining } => {
                tracing::trace!(identity = %identity, remaining, "Request admitted");
                metrics::record_admission("admit");
                Decision::Admit
            }
            Acquire::Denied { retry_after } => {
                tracing::warn!(
                    identity = %identity,
                    path = %path,
                    capacity = self.buckets.capacity(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                metrics::record_admission("deny");
                Decision::Deny(DenyReason::RateLimitExceeded { retry_after })
            }
        }
    }

    fn report_abuse(&self, signal: &AbuseSignal) {
        tracing::error!(
            identity = %signal.identity,
            count = signal.count,
            threshold = self.activity.threshold(),
            path = %signal.path,
            "Suspected abuse: request volume above threshold"
        );
        metrics::record_abuse_signal();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn buckets(&self) -> &TokenBucketRegistry {
        &self.buckets
    }

    pub fn activity(&self) -> &ActivityMonitor {
        &self.activity
    }
}

impl Default for AdmissionFilter {
    fn default() -> Self {
        Self::new(&AdmissionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;
    use crate::security::identity::UNKNOWN_IDENTITY;
    use axum::http::HeaderValue;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

    fn filter() -> (AdmissionFilter, ManualClock) {
        let clock = ManualClock::new();
        let filter = AdmissionFilter::with_clock(&AdmissionConfig::default(), Arc::new(clock.clone()));
        (filter, clock)
    }

    fn forwarded(ip: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(ip));
        headers
    }

    #[test]
    fn test_hundred_and_first_request_is_denied() {
        let (filter, _clock) = filter();
        let headers = forwarded("1.2.3.4");

        for _ in 0..100 {
            assert_eq!(filter.evaluate(&headers, "/api/greeting"), Decision::Admit);
        }
        match filter.evaluate(&headers, "/api/greeting") {
            Decision::Deny(reason) => assert_eq!(reason.to_string(), "rate limit exceeded"),
            Decision::Admit => panic!("101st request must be denied"),
        }
    }

    #[test]
    fn test_unidentified_callers_share_a_bucket() {
        let (filter, _clock) = filter();
        let none = HeaderMap::new();

        for _ in 0..60 {
            assert!(filter.evaluate(&none, "/caller-a").is_admit());
        }
        let outcomes: Vec<bool> = (0..60)
            .map(|_| filter.evaluate(&none, "/caller-b").is_admit())
            .collect();
        assert!(outcomes[..40].iter().all(|admitted| *admitted));
        assert!(outcomes[40..].iter().all(|admitted| !*admitted), "requests 101-120 must be denied");
        assert_eq!(filter.activity().snapshot(UNKNOWN_IDENTITY).unwrap().count, 120);
    }

    #[test]
    fn test_admits_again_after_refill_window() {
        let (filter, clock) = filter();
        let headers = forwarded("1.2.3.4");

        for _ in 0..100 {
            filter.evaluate(&headers, "/");
        }
        assert!(!filter.evaluate(&headers, "/").is_admit());

        clock.advance(Duration::from_secs(61));
        assert!(filter.evaluate(&headers, "/").is_admit());
    }

    #[test]
    fn test_exhausted_identity_does_not_affect_others() {
        let (filter, _clock) = filter();
        let a = forwarded("10.0.0.1");
        let b = forwarded("10.0.0.2");

        for _ in 0..101 {
            filter.evaluate(&a, "/");
        }
        assert!(!filter.evaluate(&a, "/").is_admit());
        assert!(filter.evaluate(&b, "/").is_admit());
    }

    #[test]
    fn test_denied_requests_still_count_as_activity() {
        let (filter, _clock) = filter();
        let headers = forwarded("6.6.6.6");

        for _ in 0..250 {
            filter.evaluate(&headers, "/");
        }
        let activity = filter.activity().snapshot("6.6.6.6").unwrap();
        assert_eq!(activity.count, 250);
        assert_eq!(filter.buckets().snapshot("6.6.6.6").unwrap().tokens, 0);
    }

    type CounterRow = (String, Vec<(String, String)>, u64);

    /// Every counter in one snapshot as (name, labels, value).
    fn counters(snapshotter: &Snapshotter) -> Vec<CounterRow> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(n) => {
                    let key = key.key();
                    let labels = key
                        .labels()
                        .map(|l| (l.key().to_string(), l.value().to_string()))
                        .collect();
                    Some((key.name().to_string(), labels, n))
                }
                _ => None,
            })
            .collect()
    }

    fn counter_value(rows: &[CounterRow], name: &str, label: Option<(&str, &str)>) -> u64 {
        rows.iter()
            .find(|(n, labels, _)| {
                n == name
                    && match label {
                        Some((k, v)) => labels.iter().any(|(lk, lv)| lk == k && lv == v),
                        None => labels.is_empty(),
                    }
            })
            .map(|(_, _, value)| *value)
            .unwrap_or(0)
    }

    #[test]
    fn test_denials_are_counted_apart_from_admissions() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let (filter, _clock) = filter();
        let headers = forwarded("10.0.0.1");

        ::metrics::with_local_recorder(&recorder, || {
            for _ in 0..101 {
                filter.evaluate(&headers, "/");
            }
        });

        let rows = counters(&snapshotter);
        assert_eq!(counter_value(&rows, "admission_requests_total", Some(("decision", "admit"))), 100);
        assert_eq!(counter_value(&rows, "admission_requests_total", Some(("decision", "deny"))), 1);
        assert_eq!(counter_value(&rows, "admission_abuse_signals_total", None), 0);
    }

    #[test]
    fn test_abuse_is_counted_apart_from_denials() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let (filter, _clock) = filter();
        let headers = forwarded("10.0.0.2");

        ::metrics::with_local_recorder(&recorder, || {
            for _ in 0..201 {
                filter.evaluate(&headers, "/");
            }
        });

        let rows = counters(&snapshotter);
        assert_eq!(counter_value(&rows, "admission_requests_total", Some(("decision", "admit"))), 100);
        assert_eq!(counter_value(&rows, "admission_requests_total", Some(("decision", "deny"))), 101);
        assert_eq!(counter_value(&rows, "admission_abuse_signals_total", None), 1);
    }

    #[test]
    fn test_disabled_filter_admits_without_state() {
        let filter = AdmissionFilter::disabled();
        let headers = forwarded("1.2.3.4");

        for _ in 0..150 {
            assert!(filter.evaluate(&headers, "/").is_admit());
        }
        assert_eq!(filter.buckets().tracked_identities(), 0);
        assert_eq!(filter.activity().tracked_identities(), 0);
    }
}
