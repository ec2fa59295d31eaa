//! Ratio-based circuit breaker
//!
//! Outcomes land in a rolling window. Once the window holds `min_samples`
//! outcomes and the failed share reaches `failure_rate_threshold`, the
//! breaker opens. After `open_duration` it lets trial calls through (half-open),
//! at most `success_threshold` at a time, and closes again after
//! `success_threshold` consecutive good trial calls.
//! Every state change is kept so two breakers can be compared after a run.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// 0 closed, 1 open, 2 half-open
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failed share of the window, in [0, 1], that opens the breaker
    pub failure_rate_threshold: f64,

    /// The ratio is ignored until the window holds this many outcomes
    pub min_samples: u32,

    /// Consecutive half-open successes needed to close
    pub success_threshold: u32,

    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,

    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            min_samples: 10,
            success_threshold: 3,
            open_duration: Duration::from_secs(60),
            window: Duration::from_secs(60),
        }
    }
}

/// Lifetime totals for one breaker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerCounters {
    pub succeeded: u64,
    pub failed: u64,
    /// Calls turned away while open
    pub rejected: u64,
}

impl BreakerCounters {
    pub fn recorded(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// A state change on the monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    pub state: CircuitState,
    pub at: Instant,
}

/// Shared handle; clones observe the same breaker
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    state: Option<CircuitState>,
    counters: BreakerCounters,
    /// (recorded at, succeeded)
    window: VecDeque<(Instant, bool)>,
    trial_successes: u32,
    trials_in_flight: u32,
    opened_at: Option<Instant>,
    transitions: Vec<CircuitTransition>,
}

impl Inner {
    fn current(&self) -> CircuitState {
        self.state.unwrap_or(CircuitState::Closed)
    }

    fn evict_before(&mut self, cutoff: Option<Instant>) {
        let Some(cutoff) = cutoff else {
            return;
        };
        while self.window.front().is_some_and(|(at, _)| *at <= cutoff) {
            self.window.pop_front();
        }
    }

    fn failure_share(&self) -> (usize, f64) {
        let total = self.window.len();
        if total == 0 {
            return (0, 0.0);
        }
        let failed = self.window.iter().filter(|(_, ok)| !ok).count();
        (total, failed as f64 / total as f64)
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving open to half-open once the open period lapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.expire_open(&mut inner);
        inner.current()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Admit one call. Closed admits everything and open nothing; half-open
    /// admits trial calls while fewer than `success_threshold` are outstanding.
    /// A half-open admission is released by the next recorded outcome.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        self.expire_open(&mut inner);
        match inner.current() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.success_threshold.max(1) {
                    inner.trials_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.record(true);
    }

    pub fn record_failure(&self) {
        self.record(false);
    }

    pub fn record_rejection(&self) {
        self.inner.lock().counters.rejected += 1;
    }

    pub fn counters(&self) -> BreakerCounters {
        self.inner.lock().counters
    }

    /// State changes since construction or the last reset, oldest first
    pub fn transitions(&self) -> Vec<CircuitTransition> {
        let mut inner = self.inner.lock();
        self.expire_open(&mut inner);
        inner.transitions.clone()
    }

    /// Back to a fresh closed breaker with no history
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }

    fn record(&self, succeeded: bool) {
        let mut inner = self.inner.lock();
        self.expire_open(&mut inner);
        if inner.current() == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }

        let now = Instant::now();
        if succeeded {
            inner.counters.succeeded += 1;
        } else {
            inner.counters.failed += 1;
        }
        inner.window.push_back((now, succeeded));
        inner.evict_before(now.checked_sub(self.config.window));

        match (inner.current(), succeeded) {
            (CircuitState::Closed, false) => {
                let (samples, share) = inner.failure_share();
                if samples as u32 >= self.config.min_samples
                    && share >= self.config.failure_rate_threshold
                {
                    log::warn!(
                        "circuit opened: {:.0}% of {} samples failed",
                        share * 100.0,
                        samples
                    );
                    self.enter(&mut inner, CircuitState::Open, now);
                }
            }
            (CircuitState::HalfOpen, false) => {
                log::warn!("circuit reopened: half-open trial call failed");
                self.enter(&mut inner, CircuitState::Open, now);
            }
            (CircuitState::HalfOpen, true) => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.success_threshold {
                    log::info!("circuit closed after {} good trial calls", inner.trial_successes);
                    self.enter(&mut inner, CircuitState::Closed, now);
                }
            }
            // Successes while closed need no action; outcomes of calls
            // admitted before opening do not move an open breaker.
            (CircuitState::Closed, true) | (CircuitState::Open, _) => {}
        }
    }

    fn expire_open(&self, inner: &mut Inner) {
        let lapsed = inner
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.config.open_duration);
        if inner.current() == CircuitState::Open && lapsed {
            log::info!("circuit half-open: trying dependency");
            self.enter(inner, CircuitState::HalfOpen, Instant::now());
        }
    }

    fn enter(&self, inner: &mut Inner, next: CircuitState, at: Instant) {
        inner.state = Some(next);
        inner.trial_successes = 0;
        inner.trials_in_flight = 0;
        inner.transitions.push(CircuitTransition { state: next, at });
        match next {
            CircuitState::Open => inner.opened_at = Some(at),
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: f64, min_samples: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_rate_threshold: threshold,
            min_samples,
            ..CircuitBreakerConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_trial_and_close() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_rate_threshold: 0.5,
            min_samples: 4,
            success_threshold: 2,
            open_duration: Duration::from_millis(100),
            ..CircuitBreakerConfig::default()
        });

        breaker.record_success();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // 2 of 4
        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let states: Vec<_> = breaker.transitions().iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![CircuitState::Open, CircuitState::HalfOpen, CircuitState::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_outstanding_trials() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_rate_threshold: 1.0,
            min_samples: 1,
            success_threshold: 2,
            open_duration: Duration::from_millis(100),
            ..CircuitBreakerConfig::default()
        });

        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert!(!breaker.try_acquire());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(breaker.try_acquire());
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // One trial call comes back good, freeing its slot
        breaker.record_success();
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        for _ in 0..5 {
            assert!(breaker.try_acquire());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopening_drops_outstanding_trials() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_rate_threshold: 1.0,
            min_samples: 1,
            success_threshold: 1,
            open_duration: Duration::from_millis(100),
            ..CircuitBreakerConfig::default()
        });

        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(breaker.try_acquire());
        assert!(!breaker.try_acquire());

        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_ratio_ignored_below_min_samples() {
        let breaker = breaker(0.25, 10);
        for _ in 0..9 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_rate_threshold: 1.0,
            min_samples: 2,
            open_duration: Duration::from_millis(50),
            ..CircuitBreakerConfig::default()
        });

        breaker.record_failure();
        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.transitions().len(), 3);
    }

    #[test]
    fn test_counters() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_rejection();

        let counters = breaker.counters();
        assert_eq!(counters.recorded(), 3);
        assert_eq!(counters.succeeded, 2);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_outcomes_leave_the_window() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_rate_threshold: 1.0,
            min_samples: 3,
            window: Duration::from_millis(200),
            ..CircuitBreakerConfig::default()
        });

        breaker.record_failure();
        breaker.record_failure();
        tokio::time::advance(Duration::from_millis(250)).await;

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_reset_forgets_history() {
        let breaker = breaker(1.0, 1);
        breaker.record_failure();
        assert_eq!(breaker.transitions().len(), 1);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.transitions().is_empty());
        assert_eq!(breaker.counters(), BreakerCounters::default());
    }
}
