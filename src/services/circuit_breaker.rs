//! Per-endpoint circuit breaker.
//!
//! A three-state fault isolator with a sliding failure window. The
//! `Open -> HalfOpen` transition is observational: it is applied whenever
//! state is read after the reset timeout has elapsed, so no background timer
//! is needed. In `HalfOpen` the next recorded outcome is decisive.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::CircuitBreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow; failures accumulate in the window.
    Closed,
    /// Requests are short-circuited until the reset timeout elapses.
    Open,
    /// One probe request decides between `Closed` and `Open`.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Timestamps of recent failures; pruned to the window on every write.
    failures: Vec<Instant>,
}

/// Three-state circuit breaker guarding a single endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: usize,
    reset_timeout: Duration,
    window: Duration,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                failures: Vec::new(),
            }),
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            window: Duration::from_millis(config.window_ms),
        }
    }

    /// Returns the current state, applying the observational
    /// `Open -> HalfOpen` transition when the reset timeout has elapsed.
    pub fn current_state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        Self::observe(&mut inner, self.reset_timeout);
        inner.state
    }

    /// Whether a request may be attempted (`Closed` or `HalfOpen`).
    pub fn can_execute(&self) -> bool {
        self.current_state() != CircuitState::Open
    }

    /// Records a successful request. In `HalfOpen` the probe succeeded and
    /// the breaker closes, clearing the failure window; otherwise a no-op.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        Self::observe(&mut inner, self.reset_timeout);
        if inner.state == CircuitState::HalfOpen {
            debug!("circuit breaker closing after successful probe");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.failures.clear();
        }
    }

    /// Records a failed request. A `HalfOpen` probe failure re-opens the
    /// breaker immediately; in `Closed` the failure lands in the sliding
    /// window and the breaker opens once the threshold is inside it.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Self::observe(&mut inner, self.reset_timeout);

        if inner.state == CircuitState::HalfOpen {
            debug!("circuit breaker re-opening after failed probe");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            return;
        }

        let window = self.window;
        inner
            .failures
            .retain(|stamp| now.duration_since(*stamp) <= window);
        inner.failures.push(now);

        if inner.state == CircuitState::Closed && inner.failures.len() >= self.failure_threshold {
            debug!(
                failures = inner.failures.len(),
                threshold = self.failure_threshold,
                "circuit breaker opening"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
        }
    }

    /// Resets the breaker to `Closed` with an empty window.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.failures.clear();
    }

    fn observe(inner: &mut BreakerInner, reset_timeout: Duration) {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= reset_timeout {
                debug!("circuit breaker half-opening after reset timeout");
                inner.state = CircuitState::HalfOpen;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn breaker(threshold: usize, reset_timeout_ms: u64, window_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_ms,
            window_ms,
        })
    }

    #[test]
    fn test_starts_closed() {
        let breaker = breaker(5, 30_000, 60_000);
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_opens_after_exactly_threshold_failures() {
        let breaker = breaker(3, 30_000, 60_000);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_success_in_closed_state_is_a_noop() {
        let breaker = breaker(2, 30_000, 60_000);
        breaker.record_failure();
        breaker.record_success();
        // The window is untouched by successes in Closed.
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_opens_on_state_read_after_timeout() {
        let breaker = breaker(1, 50, 60_000);
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());
    }

    #[tokio::test]
    async fn test_half_open_success_closes_and_clears_window() {
        let breaker = breaker(2, 50, 60_000);
        breaker.record_failure();
        breaker.record_failure();
        sleep(Duration::from_millis(80)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        // The window was cleared; a single failure must not re-open.
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_resets_timer() {
        let breaker = breaker(1, 60, 60_000);
        breaker.record_failure();
        sleep(Duration::from_millis(90)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        // The reset timer restarted; well inside it the breaker stays open.
        sleep(Duration::from_millis(20)).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);

        sleep(Duration::from_millis(70)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_failures_outside_window_are_pruned() {
        let breaker = breaker(3, 30_000, 60);

        breaker.record_failure();
        breaker.record_failure();
        sleep(Duration::from_millis(100)).await;

        // The first two failures fell out of the window.
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_returns_to_closed() {
        let breaker = breaker(1, 30_000, 60_000);
        breaker.record_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }
}
