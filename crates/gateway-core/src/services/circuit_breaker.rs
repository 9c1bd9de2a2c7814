//! Per-service circuit breaker protecting dispatch from a known-bad backend.
//!
//! Unlike a bare consecutive-failure counter, opening requires both a
//! failure count and a minimum observed request volume within a rolling
//! `monitoring_window` — a service that receives one request and fails it
//! should not trip the breaker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use log::{debug, info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed = 0,
    /// Circuit is open - failing fast
    Open = 1,
    /// Testing if service is back
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Tuning parameters for a single service's breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Errors within `monitoring_window` needed to trip the breaker.
    pub failure_threshold: u32,
    /// Minimum request volume within `monitoring_window` required before a
    /// breaker can trip; guards against opening on one unlucky request.
    pub volume_threshold: u32,
    /// Consecutive successes in half-open needed to close the breaker.
    pub success_threshold: u32,
    /// Width of the rolling window error/volume counts are drawn from.
    pub monitoring_window: Duration,
    /// Time an open breaker waits before allowing a half-open probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            volume_threshold: 10,
            success_threshold: 2,
            monitoring_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    failed: bool,
}

/// Rolling window of recent outcomes, trimmed lazily on access.
#[derive(Debug, Default)]
struct Window {
    outcomes: VecDeque<Outcome>,
}

impl Window {
    fn record(&mut self, failed: bool, window: Duration) {
        self.trim(window);
        self.outcomes.push_back(Outcome {
            at: Instant::now(),
            failed,
        });
    }

    fn trim(&mut self, window: Duration) {
        let cutoff = Instant::now().checked_sub(window);
        while let Some(front) = self.outcomes.front() {
            if let Some(cutoff) = cutoff {
                if front.at < cutoff {
                    self.outcomes.pop_front();
                    continue;
                }
            }
            break;
        }
    }

    fn counts(&mut self, window: Duration) -> (u32, u32) {
        self.trim(window);
        let total = self.outcomes.len() as u32;
        let failures = self.outcomes.iter().filter(|o| o.failed).count() as u32;
        (total, failures)
    }
}

/// Per-service breaker. Cheap to check (`is_open`) on every request's hot
/// path; state transitions serialize on `state`/`window` which only block
/// while the outcome ledger is actually being updated.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    success_count: AtomicU64,
    window: RwLock<Window>,
    last_transition: RwLock<Option<Instant>>,
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            success_count: AtomicU64::new(0),
            window: RwLock::new(Window::default()),
            last_transition: RwLock::new(None),
            name,
        })
    }

    /// Wraps an operation with breaker protection: short-circuits while
    /// open, and records the operation's outcome on completion.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if self.is_open().await {
            debug!("circuit breaker {} open, failing fast", self.name);
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(error) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn is_open(&self) -> bool {
        match CircuitState::from(self.state.load(Ordering::Relaxed)) {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let last = *self.last_transition.read().await;
                match last {
                    Some(at) if at.elapsed() >= self.config.reset_timeout => {
                        self.transition_to_half_open().await;
                        false
                    }
                    _ => true,
                }
            }
        }
    }

    async fn on_success(&self) {
        match CircuitState::from(self.state.load(Ordering::Relaxed)) {
            CircuitState::Closed => {
                let mut window = self.window.write().await;
                window.record(false, self.config.monitoring_window);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                if successes >= self.config.success_threshold as u64 {
                    self.transition_to_closed().await;
                }
            }
            CircuitState::Open => {
                debug!("unexpected success while open for circuit {}", self.name);
            }
        }
    }

    async fn on_failure(&self) {
        match CircuitState::from(self.state.load(Ordering::Relaxed)) {
            CircuitState::Closed => {
                let (total, failures) = {
                    let mut window = self.window.write().await;
                    window.record(true, self.config.monitoring_window);
                    window.counts(self.config.monitoring_window)
                };
                if total >= self.config.volume_threshold && failures >= self.config.failure_threshold {
                    self.transition_to_open().await;
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to_open().await;
            }
            CircuitState::Open => {
                *self.last_transition.write().await = Some(Instant::now());
            }
        }
    }

    async fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Relaxed);
        *self.last_transition.write().await = Some(Instant::now());
        self.success_count.store(0, Ordering::Relaxed);
        warn!("circuit breaker {} opened", self.name);
    }

    async fn transition_to_half_open(&self) {
        self.state.store(CircuitState::HalfOpen as u8, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        info!("circuit breaker {} half-open, probing", self.name);
    }

    async fn transition_to_closed(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.window.write().await.outcomes.clear();
        info!("circuit breaker {} closed, service recovered", self.name);
    }

    pub fn get_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Relaxed))
    }

    pub async fn window_counts(&self) -> (u32, u32) {
        self.window.write().await.counts(self.config.monitoring_window)
    }

    pub fn get_success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stays_closed_below_volume_threshold() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            volume_threshold: 10,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("svc".to_string(), config);

        for _ in 0..3 {
            let _ = breaker
                .call(async { Err::<(), _>("boom") })
                .await;
        }
        assert_eq!(breaker.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_once_both_thresholds_cross() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            volume_threshold: 3,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("svc".to_string(), config);

        let _ = breaker.call(async { Ok::<_, &str>(()) }).await;
        let _ = breaker.call(async { Err::<(), _>("boom") }).await;
        let _ = breaker.call(async { Err::<(), _>("boom") }).await;

        assert_eq!(breaker.get_state(), CircuitState::Open);
        let result = breaker.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    /// Mirrors seed scenario 6: 10 requests of which 6 are backend 5xx
    /// (surfaced to `call` as `Err`, per [`crate::services::pipeline`]'s
    /// `counts_as_breaker_failure`), then the 11th request is rejected
    /// fast with `CircuitOpen` rather than reaching the backend.
    #[tokio::test]
    async fn ten_requests_six_failing_trips_before_the_eleventh() {
        let config = CircuitBreakerConfig {
            failure_threshold: 5,
            volume_threshold: 10,
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("svc".to_string(), config);

        // Six `true` (failed) entries, four `false` (succeeded).
        let outcomes = [
            false, true, false, true, true, false, true, true, false, true,
        ];
        for failed in outcomes {
            let _ = breaker
                .call(async move {
                    if failed {
                        Err::<(), _>("backend 503")
                    } else {
                        Ok(())
                    }
                })
                .await;
        }

        assert_eq!(breaker.get_state(), CircuitState::Open);
        let result = breaker.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn half_open_single_failure_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            volume_threshold: 1,
            reset_timeout: Duration::from_millis(1),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("svc".to_string(), config);

        let _ = breaker.call(async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.get_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = breaker.call(async { Err::<(), _>("boom again") }).await;
        assert_eq!(breaker.get_state(), CircuitState::Open);
    }
}
