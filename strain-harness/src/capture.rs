//! Before/after metric snapshots and their deltas

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strain_resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, DependencyCounters,
    MetricsRegistry,
};

/// Counters and breaker states at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSnapshot {
    pub counters: BTreeMap<String, DependencyCounters>,
    pub cb_states: BTreeMap<String, CircuitState>,
}

/// Change in counters between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricDelta {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub timeout_calls: u64,
    pub circuit_open_calls: u64,
    pub total_retries: u64,
    /// Retries per logical call
    pub retry_amplification_factor: f64,
    /// Breaker state gauges after the run (0 closed, 1 open, 2 half-open)
    pub cb_states: BTreeMap<String, i64>,
}

impl MetricDelta {
    /// Fraction of calls that did not succeed
    pub fn error_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            (self.total_calls - self.successful_calls.min(self.total_calls)) as f64
                / self.total_calls as f64
        }
    }
}

/// Retries per call, 0.0 when there were no calls
pub fn retry_amplification(total_retries: u64, total_calls: u64) -> f64 {
    if total_calls == 0 {
        0.0
    } else {
        total_retries as f64 / total_calls as f64
    }
}

/// Subtract `before` from `after`, dependency by dependency
pub fn compute_delta(before: &MetricSnapshot, after: &MetricSnapshot) -> MetricDelta {
    let mut delta = MetricDelta::default();

    for (dependency, now) in &after.counters {
        let then = before.counters.get(dependency).cloned().unwrap_or_default();
        delta.successful_calls += now.success.saturating_sub(then.success);
        delta.failed_calls += now.failure.saturating_sub(then.failure);
        delta.timeout_calls += now.timeout.saturating_sub(then.timeout);
        delta.circuit_open_calls += now.circuit_open.saturating_sub(then.circuit_open);
        delta.total_retries += now.retries.saturating_sub(then.retries);
    }

    delta.total_calls = delta.successful_calls
        + delta.failed_calls
        + delta.timeout_calls
        + delta.circuit_open_calls;
    delta.retry_amplification_factor = retry_amplification(delta.total_retries, delta.total_calls);
    delta.cb_states = after
        .cb_states
        .iter()
        .map(|(dependency, state)| (dependency.clone(), state.as_gauge()))
        .collect();

    delta
}

/// Isolated metrics and breaker state for one scenario (or one instance)
#[derive(Clone)]
pub struct MetricsCapture {
    metrics: Arc<MetricsRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl MetricsCapture {
    pub fn new(metrics: Arc<MetricsRegistry>, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { metrics, breakers }
    }

    /// Capture backed by fresh registries that share nothing with any other
    pub fn isolated(breaker_config: CircuitBreakerConfig) -> Self {
        Self::new(
            Arc::new(MetricsRegistry::new()),
            Arc::new(CircuitBreakerRegistry::new(breaker_config)),
        )
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            counters: self.metrics.snapshot(),
            cb_states: self.breakers.states(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strain_resilience::CallOutcome;

    fn counters(success: u64, failure: u64, retries: u64) -> DependencyCounters {
        DependencyCounters {
            success,
            failure,
            retries,
            ..DependencyCounters::default()
        }
    }

    #[test]
    fn test_retry_amplification() {
        let before = MetricSnapshot::default();
        let mut after = MetricSnapshot::default();
        after.counters.insert("primary".to_string(), counters(70, 30, 30));

        let delta = compute_delta(&before, &after);
        assert_eq!(delta.total_calls, 100);
        assert_eq!(delta.total_retries, 30);
        assert!((delta.retry_amplification_factor - 0.3).abs() < 1e-12);
        assert!((delta.error_rate() - 0.3).abs() < 1e-12);

        let empty = compute_delta(&before, &before);
        assert_eq!(empty.total_calls, 0);
        assert_eq!(empty.retry_amplification_factor, 0.0);
    }

    #[test]
    fn test_delta_subtracts_baseline() {
        let mut before = MetricSnapshot::default();
        before.counters.insert("primary".to_string(), counters(10, 2, 1));

        let mut after = MetricSnapshot::default();
        after.counters.insert("primary".to_string(), counters(25, 5, 4));
        after.counters.insert("secondary".to_string(), counters(3, 0, 0));
        after.cb_states.insert("primary".to_string(), CircuitState::Open);

        let delta = compute_delta(&before, &after);
        assert_eq!(delta.successful_calls, 18);
        assert_eq!(delta.failed_calls, 3);
        assert_eq!(delta.total_retries, 3);
        assert_eq!(delta.cb_states.get("primary"), Some(&1));
    }

    #[test]
    fn test_captures_are_isolated() {
        let first = MetricsCapture::isolated(CircuitBreakerConfig::default());
        let second = MetricsCapture::isolated(CircuitBreakerConfig::default());

        let before = second.snapshot();
        for _ in 0..5 {
            first.metrics().record_outcome("primary", CallOutcome::Failure);
            first.metrics().record_retry("primary");
        }
        first.breakers().get("primary").record_failure();

        let delta = compute_delta(&before, &second.snapshot());
        assert_eq!(delta, MetricDelta::default());
        assert!(second.snapshot().cb_states.is_empty());

        assert_eq!(first.snapshot().counters["primary"].failure, 5);
    }

    proptest! {
        #[test]
        fn amplification_matches_ratio(retries in 0u64..10_000, calls in 0u64..10_000) {
            let factor = retry_amplification(retries, calls);
            if calls == 0 {
                prop_assert_eq!(factor, 0.0);
            } else {
                prop_assert!((factor * calls as f64 - retries as f64).abs() < 1e-6);
            }
        }
    }
}
