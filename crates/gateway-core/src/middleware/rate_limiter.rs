//! Rate limiting invoked from inside the forward engine rather than as a
//! static Actix middleware: the key and the algorithm both depend on the
//! resolved per-route policy (§4.4), which is only known once routing and
//! policy resolution have already run, so it cannot sit in a fixed
//! `App::wrap` stack.
//!
//! The three window algorithms below are the same ones the gateway has
//! always offered; only the key derivation (now `RateLimitKeyType` +
//! `segment` instead of a fixed per-IP/per-user strategy) and the call site
//! changed.

use crate::models::policy::{RateLimitAlgorithm, RateLimitKeyType, RateLimitPolicy};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct RateLimitEntry {
    request_count: u64,
    window_start: Instant,
    request_times: Vec<Instant>,
    available_tokens: f64,
    last_refill: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            request_count: 0,
            window_start: now,
            request_times: Vec::new(),
            available_tokens: 0.0,
            last_refill: now,
        }
    }
}

/// Outcome of a rate-limit check: either allowed, or rejected with the
/// number of seconds the client should wait before retrying.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitDecision {
    Allow,
    Reject { retry_after_secs: u64 },
}

/// Builds the bucket key for a policy given the request's identity facts.
/// `Global` ignores both `user_id` and `ip`; `PerUser` falls back to `ip`
/// when the request is unauthenticated (anonymous traffic still gets
/// limited, just bucketed by address instead of identity).
pub fn build_key(policy: &RateLimitPolicy, user_id: Option<&str>, ip: &str) -> String {
    let identity = match policy.key_type {
        RateLimitKeyType::Global => "global".to_string(),
        RateLimitKeyType::PerUser => user_id.map(str::to_string).unwrap_or_else(|| format!("ip:{ip}")),
        RateLimitKeyType::PerIp => format!("ip:{ip}"),
    };
    match &policy.segment {
        Some(segment) => format!("{segment}:{identity}"),
        None => identity,
    }
}

/// In-memory limiter store, one process-wide instance shared across routes.
/// Entries are periodically swept so abandoned keys (e.g. IPs that stop
/// sending traffic) do not grow the map unbounded.
pub struct RateLimiter {
    entries: RwLock<HashMap<String, RateLimitEntry>>,
    last_cleanup: RwLock<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_cleanup: RwLock::new(Instant::now()),
        }
    }

    pub fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        if !policy.enabled {
            return RateLimitDecision::Allow;
        }

        self.cleanup_expired(policy);

        let mut entries = self.entries.write().unwrap();
        let entry = entries.entry(key.to_string()).or_insert_with(RateLimitEntry::new);

        let allowed = match policy.algorithm {
            RateLimitAlgorithm::FixedWindow => Self::check_fixed_window(entry, policy),
            RateLimitAlgorithm::SlidingWindow => Self::check_sliding_window(entry, policy),
            RateLimitAlgorithm::TokenBucket => Self::check_token_bucket(entry, policy),
        };

        if allowed {
            RateLimitDecision::Allow
        } else {
            RateLimitDecision::Reject {
                retry_after_secs: policy.window_secs,
            }
        }
    }

    fn check_fixed_window(entry: &mut RateLimitEntry, policy: &RateLimitPolicy) -> bool {
        let now = Instant::now();
        let window = Duration::from_secs(policy.window_secs);

        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.request_count = 0;
        }

        let limit = policy.limit as u64 + policy.burst.unwrap_or(0) as u64;
        let allowed = entry.request_count < limit;
        if allowed {
            entry.request_count += 1;
        }
        allowed
    }

    fn check_sliding_window(entry: &mut RateLimitEntry, policy: &RateLimitPolicy) -> bool {
        let now = Instant::now();
        let window = Duration::from_secs(policy.window_secs);

        entry.request_times.retain(|&t| now.duration_since(t) < window);

        let limit = policy.limit as u64 + policy.burst.unwrap_or(0) as u64;
        let allowed = (entry.request_times.len() as u64) < limit;
        if allowed {
            entry.request_times.push(now);
        }
        allowed
    }

    fn check_token_bucket(entry: &mut RateLimitEntry, policy: &RateLimitPolicy) -> bool {
        let now = Instant::now();
        let time_passed = now.duration_since(entry.last_refill).as_secs_f64();
        let refill_rate = policy.limit as f64 / policy.window_secs.max(1) as f64;

        if entry.available_tokens == 0.0 && time_passed < 0.001 {
            entry.available_tokens = policy.limit as f64;
        }

        let max_tokens = (policy.limit + policy.burst.unwrap_or(0)) as f64;
        entry.available_tokens = (entry.available_tokens + time_passed * refill_rate).min(max_tokens);
        entry.last_refill = now;

        let allowed = entry.available_tokens >= 1.0;
        if allowed {
            entry.available_tokens -= 1.0;
        }
        allowed
    }

    fn cleanup_expired(&self, policy: &RateLimitPolicy) {
        let now = Instant::now();
        let mut last_cleanup = self.last_cleanup.write().unwrap();
        if now.duration_since(*last_cleanup) < Duration::from_secs(300) {
            return;
        }
        let cleanup_threshold = Duration::from_secs(policy.window_secs) * 2;
        self.entries
            .write()
            .unwrap()
            .retain(|_, e| now.duration_since(e.window_start) < cleanup_threshold);
        *last_cleanup = now;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::RateLimitAlgorithm;

    fn policy(limit: u32, window_secs: u64, algorithm: RateLimitAlgorithm) -> RateLimitPolicy {
        RateLimitPolicy {
            enabled: true,
            algorithm,
            limit,
            window_secs,
            burst: None,
            key_type: RateLimitKeyType::PerIp,
            segment: None,
        }
    }

    #[test]
    fn disabled_policy_always_allows() {
        let limiter = RateLimiter::new();
        let mut policy = policy(1, 60, RateLimitAlgorithm::FixedWindow);
        policy.enabled = false;
        for _ in 0..10 {
            assert_eq!(limiter.check("k", &policy), RateLimitDecision::Allow);
        }
    }

    #[test]
    fn fixed_window_rejects_past_limit() {
        let limiter = RateLimiter::new();
        let policy = policy(2, 60, RateLimitAlgorithm::FixedWindow);
        assert_eq!(limiter.check("k", &policy), RateLimitDecision::Allow);
        assert_eq!(limiter.check("k", &policy), RateLimitDecision::Allow);
        assert!(matches!(
            limiter.check("k", &policy),
            RateLimitDecision::Reject { .. }
        ));
    }

    #[test]
    fn sliding_window_rejects_past_limit() {
        let limiter = RateLimiter::new();
        let policy = policy(2, 60, RateLimitAlgorithm::SlidingWindow);
        assert_eq!(limiter.check("k", &policy), RateLimitDecision::Allow);
        assert_eq!(limiter.check("k", &policy), RateLimitDecision::Allow);
        assert!(matches!(
            limiter.check("k", &policy),
            RateLimitDecision::Reject { .. }
        ));
    }

    #[test]
    fn global_key_ignores_identity() {
        let policy = RateLimitPolicy {
            key_type: RateLimitKeyType::Global,
            segment: Some("checkout".to_string()),
            ..policy(10, 60, RateLimitAlgorithm::FixedWindow)
        };
        assert_eq!(build_key(&policy, Some("u1"), "1.2.3.4"), "checkout:global");
        assert_eq!(build_key(&policy, None, "5.6.7.8"), "checkout:global");
    }

    #[test]
    fn per_user_key_falls_back_to_ip_when_anonymous() {
        let policy = policy(10, 60, RateLimitAlgorithm::FixedWindow);
        let policy = RateLimitPolicy {
            key_type: RateLimitKeyType::PerUser,
            ..policy
        };
        assert_eq!(build_key(&policy, Some("u1"), "1.2.3.4"), "u1");
        assert_eq!(build_key(&policy, None, "1.2.3.4"), "ip:1.2.3.4");
    }

    #[test]
    fn different_keys_have_independent_buckets() {
        let limiter = RateLimiter::new();
        let policy = policy(1, 60, RateLimitAlgorithm::FixedWindow);
        assert_eq!(limiter.check("a", &policy), RateLimitDecision::Allow);
        assert_eq!(limiter.check("b", &policy), RateLimitDecision::Allow);
        assert!(matches!(
            limiter.check("a", &policy),
            RateLimitDecision::Reject { .. }
        ));
    }
}
