//! Dependency call wrapper: timeout, retry and circuit-breaker pre-check

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::circuit_breaker::CircuitBreaker;
use crate::metrics::{CallOutcome, MetricsRegistry};
use crate::registry::CircuitBreakerRegistry;
use crate::retry::{RetryExecutor, RetryPolicy, Retryable};

/// Boxed future returned by a dependency call
pub type CallFuture = BoxFuture<'static, Result<(), CallError>>;

/// A cloneable, repeatable async call against a dependency
pub type CallFn = Arc<dyn Fn() -> CallFuture + Send + Sync>;

/// Build a [`CallFn`] from an async closure
pub fn call_fn<F, Fut>(f: F) -> CallFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Errors surfaced by a dependency call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    #[error("Call timed out: {0}")]
    Timeout(String),

    #[error("Error response: {0}")]
    ErrorResponse(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Rejected by the circuit breaker without reaching the dependency
    #[error("Circuit breaker is open for dependency '{0}'")]
    CircuitOpen(String),

    #[error("{0}")]
    Other(String),
}

impl CallError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout(_))
    }

    fn outcome(&self) -> CallOutcome {
        match self {
            CallError::Timeout(_) => CallOutcome::Timeout,
            CallError::CircuitOpen(_) => CallOutcome::CircuitOpen,
            _ => CallOutcome::Failure,
        }
    }
}

impl Retryable for CallError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::Timeout(_) | CallError::ErrorResponse(_) | CallError::Connection(_)
        )
    }
}

/// How a dependency is called
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyPolicy {
    pub retry: RetryPolicy,

    /// Per-attempt timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Whether writes may be retried. Off by default: a retried write can
    /// apply twice.
    #[serde(default)]
    pub retry_writes: bool,
}

impl Default for DependencyPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(5),
            retry_writes: false,
        }
    }
}

/// Calls one named dependency through its circuit breaker, recording every
/// outcome and retry in a metrics registry.
#[derive(Clone)]
pub struct DependencyCaller {
    name: String,
    breaker: CircuitBreaker,
    policy: DependencyPolicy,
    metrics: Arc<MetricsRegistry>,
}

impl DependencyCaller {
    pub fn new(
        name: impl Into<String>,
        breakers: &CircuitBreakerRegistry,
        metrics: Arc<MetricsRegistry>,
        policy: DependencyPolicy,
    ) -> Self {
        let name = name.into();
        let breaker = breakers.get(&name);
        Self {
            name,
            breaker,
            policy,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn policy(&self) -> &DependencyPolicy {
        &self.policy
    }

    /// Retry policy in effect for a call with the given write flag
    pub fn effective_retry(&self, is_write: bool) -> RetryPolicy {
        if is_write && !self.policy.retry_writes {
            RetryPolicy {
                max_attempts: 1,
                ..self.policy.retry.clone()
            }
        } else {
            self.policy.retry.clone()
        }
    }

    /// Call the dependency
    pub async fn call(&self, target: &CallFn, is_write: bool) -> Result<(), CallError> {
        if !self.breaker.try_acquire() {
            return Err(self.reject());
        }

        let executor = RetryExecutor::new(self.effective_retry(is_write));
        let result = executor
            .run(|attempt| self.attempt(target, attempt))
            .await
            .map_err(|error| error.into_inner());

        let outcome = match &result {
            Ok(()) => CallOutcome::Success,
            Err(error) => error.outcome(),
        };
        self.metrics.record_outcome(&self.name, outcome);
        result
    }

    async fn attempt(&self, target: &CallFn, attempt: u32) -> Result<(), CallError> {
        if attempt > 1 {
            if !self.breaker.try_acquire() {
                self.breaker.record_rejection();
                return Err(CallError::CircuitOpen(self.name.clone()));
            }
            self.metrics.record_retry(&self.name);
        }

        match tokio::time::timeout(self.policy.timeout, target()).await {
            Ok(Ok(())) => {
                self.breaker.record_success();
                Ok(())
            }
            Ok(Err(error)) => {
                self.breaker.record_failure();
                Err(error)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(CallError::Timeout(format!(
                    "{} did not respond within {:?}",
                    self.name, self.policy.timeout
                )))
            }
        }
    }

    fn reject(&self) -> CallError {
        self.breaker.record_rejection();
        self.metrics
            .record_outcome(&self.name, CallOutcome::CircuitOpen);
        CallError::CircuitOpen(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::retry::BackoffStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> DependencyPolicy {
        DependencyPolicy {
            retry: RetryPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff: BackoffStrategy::Fixed,
                jitter: false,
            },
            timeout: Duration::from_millis(100),
            retry_writes: false,
        }
    }

    fn counting_call(fail_first: u32, counter: Arc<AtomicU32>) -> CallFn {
        call_fn(move || {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if seen < fail_first {
                    Err(CallError::Connection("refused".to_string()))
                } else {
                    Ok(())
                }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let metrics = Arc::new(MetricsRegistry::new());
        let caller = DependencyCaller::new("ocr", &breakers, Arc::clone(&metrics), policy(3));

        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(2, Arc::clone(&counter));

        caller.call(&call, false).await.unwrap();

        let counters = metrics.counters("ocr");
        assert_eq!(counters.success, 1);
        assert_eq!(counters.retries, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_are_not_retried() {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let metrics = Arc::new(MetricsRegistry::new());
        let caller = DependencyCaller::new("ledger", &breakers, Arc::clone(&metrics), policy(3));

        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(1, Arc::clone(&counter));

        let error = caller.call(&call, true).await.unwrap_err();
        assert!(matches!(error, CallError::Connection(_)));

        let counters = metrics.counters("ledger");
        assert_eq!(counters.failure, 1);
        assert_eq!(counters.retries, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_classified() {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let metrics = Arc::new(MetricsRegistry::new());
        let caller = DependencyCaller::new("slow", &breakers, Arc::clone(&metrics), policy(1));

        let call = call_fn(|| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        });

        let error = caller.call(&call, false).await.unwrap_err();
        assert!(error.is_timeout());
        assert_eq!(metrics.counters("slow").timeout, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_rejects() {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_rate_threshold: 1.0,
            min_samples: 2,
            ..CircuitBreakerConfig::default()
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let caller = DependencyCaller::new("flaky", &breakers, Arc::clone(&metrics), policy(1));

        let failing = call_fn(|| async { Err(CallError::ErrorResponse("503".to_string())) });
        let _ = caller.call(&failing, false).await;
        let _ = caller.call(&failing, false).await;
        assert_eq!(breakers.state("flaky"), Some(CircuitState::Open));

        let error = caller.call(&failing, false).await.unwrap_err();
        assert!(error.is_circuit_open());

        let counters = metrics.counters("flaky");
        assert_eq!(counters.failure, 2);
        assert_eq!(counters.circuit_open, 1);
        assert_eq!(caller.breaker().counters().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_trial_at_a_time() {
        let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_rate_threshold: 1.0,
            min_samples: 1,
            success_threshold: 1,
            open_duration: Duration::from_millis(100),
            ..CircuitBreakerConfig::default()
        });
        let metrics = Arc::new(MetricsRegistry::new());
        let caller = DependencyCaller::new("search", &breakers, Arc::clone(&metrics), policy(1));

        let failing = call_fn(|| async { Err(CallError::Connection("reset".to_string())) });
        let _ = caller.call(&failing, false).await;
        tokio::time::advance(Duration::from_millis(150)).await;

        let reached = Arc::new(AtomicU32::new(0));
        let slow = {
            let reached = Arc::clone(&reached);
            call_fn(move || {
                reached.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(())
                }
            })
        };

        let results =
            futures::future::join_all((0..3).map(|_| caller.call(&slow, false))).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(e) if e.is_circuit_open()))
                .count(),
            2
        );
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(breakers.state("search"), Some(CircuitState::Closed));
        assert_eq!(metrics.counters("search").circuit_open, 2);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CallError::Timeout("t".into()).is_retryable());
        assert!(CallError::Connection("c".into()).is_retryable());
        assert!(!CallError::CircuitOpen("dep".into()).is_retryable());
        assert!(!CallError::Other("x".into()).is_retryable());
    }
}
