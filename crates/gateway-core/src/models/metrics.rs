//! Routing metrics: mutated only by the forward engine, read by admin
//! introspection endpoints. Totals and per-service counters are plain
//! atomics; the rolling average response time is updated under a short
//! critical section since it is not representable as a single atomic op.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct ServiceCounters {
    requests: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Serialize, Clone)]
pub struct ServiceCounterSnapshot {
    pub requests: u64,
    pub errors: u64,
}

#[derive(Debug, Serialize, Clone)]
pub struct RoutingMetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time_ms: f64,
    pub per_service: HashMap<String, ServiceCounterSnapshot>,
}

/// Process-local routing metrics. `record_success`/`record_failure` are the
/// only mutation points and are called exactly once per completed request
/// from the forward engine.
#[derive(Debug, Default)]
pub struct RoutingMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    // Stored as whole microseconds so the rolling average survives as a u64;
    // converted to milliseconds on read.
    average_response_time_us: RwLock<f64>,
    per_service: RwLock<HashMap<String, ServiceCounters>>,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, service: &str, duration: std::time::Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.update_rolling_average(duration);
        self.bump_service(service, false);
    }

    pub fn record_failure(&self, service: &str, duration: std::time::Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.update_rolling_average(duration);
        self.bump_service(service, true);
    }

    fn bump_service(&self, service: &str, is_error: bool) {
        let counters = {
            let read = self.per_service.read().unwrap();
            if let Some(existing) = read.get(service) {
                existing.requests.fetch_add(1, Ordering::Relaxed);
                if is_error {
                    existing.errors.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
            drop(read);
            ServiceCounters::default()
        };
        counters.requests.store(1, Ordering::Relaxed);
        if is_error {
            counters.errors.store(1, Ordering::Relaxed);
        }
        self.per_service
            .write()
            .unwrap()
            .entry(service.to_string())
            .or_insert(counters);
    }

    /// `(old_avg * (n - 1) + dur) / n`, computed under a short write lock so
    /// concurrent updates never interleave.
    fn update_rolling_average(&self, duration: std::time::Duration) {
        let n = self.total_requests.load(Ordering::Relaxed).max(1) as f64;
        let dur_us = duration.as_micros() as f64;
        let mut avg = self.average_response_time_us.write().unwrap();
        *avg = (*avg * (n - 1.0) + dur_us) / n;
    }

    pub fn snapshot(&self) -> RoutingMetricsSnapshot {
        let per_service = self
            .per_service
            .read()
            .unwrap()
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    ServiceCounterSnapshot {
                        requests: counters.requests.load(Ordering::Relaxed),
                        errors: counters.errors.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        RoutingMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            average_response_time_ms: *self.average_response_time_us.read().unwrap() / 1000.0,
            per_service,
        }
    }

    pub fn clear(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        *self.average_response_time_us.write().unwrap() = 0.0;
        self.per_service.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rolling_average_converges_to_mean() {
        let metrics = RoutingMetrics::new();
        metrics.record_success("svc", Duration::from_millis(10));
        metrics.record_success("svc", Duration::from_millis(20));
        metrics.record_success("svc", Duration::from_millis(30));
        let snapshot = metrics.snapshot();
        assert!((snapshot.average_response_time_ms - 20.0).abs() < 0.01);
    }

    #[test]
    fn per_service_counters_track_errors_independently() {
        let metrics = RoutingMetrics::new();
        metrics.record_success("a", Duration::from_millis(1));
        metrics.record_failure("a", Duration::from_millis(1));
        metrics.record_failure("b", Duration::from_millis(1));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.per_service["a"].requests, 2);
        assert_eq!(snapshot.per_service["a"].errors, 1);
        assert_eq!(snapshot.per_service["b"].errors, 1);
        assert_eq!(snapshot.total_requests, 3);
    }

    #[test]
    fn clear_resets_everything() {
        let metrics = RoutingMetrics::new();
        metrics.record_success("a", Duration::from_millis(5));
        metrics.clear();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert!(snapshot.per_service.is_empty());
    }
}
