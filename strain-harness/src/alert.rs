//! Alert rules evaluated against scenario metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strain_config::AlertThresholds;

use crate::scenario::ScenarioResult;

/// Metric an alert rule watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    ErrorRate,
    P95LatencyMs,
    RetryAmplification,
}

impl AlertMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertMetric::ErrorRate => "error_rate",
            AlertMetric::P95LatencyMs => "p95_latency_ms",
            AlertMetric::RetryAmplification => "retry_amplification",
        }
    }
}

impl std::fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fires when `metric` rises above `threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric: AlertMetric,
    pub threshold: f64,
}

impl AlertRule {
    pub fn new(name: impl Into<String>, metric: AlertMetric, threshold: f64) -> Self {
        Self {
            name: name.into(),
            metric,
            threshold,
        }
    }

    /// The built-in rules with the configured thresholds
    pub fn defaults(thresholds: &AlertThresholds) -> Vec<AlertRule> {
        vec![
            AlertRule::new("high_error_rate", AlertMetric::ErrorRate, thresholds.error_rate),
            AlertRule::new(
                "slow_p95_latency",
                AlertMetric::P95LatencyMs,
                thresholds.p95_latency_ms,
            ),
            AlertRule::new(
                "retry_storm",
                AlertMetric::RetryAmplification,
                thresholds.retry_amplification,
            ),
        ]
    }
}

/// Observed metric values, keyed by metric
pub type MetricValues = BTreeMap<AlertMetric, f64>;

/// Values an alert rule sees for one scenario
pub fn metric_values(result: &ScenarioResult) -> MetricValues {
    BTreeMap::from([
        (AlertMetric::ErrorRate, result.load_result.error_rate()),
        (AlertMetric::P95LatencyMs, result.load_result.p95_latency_ms),
        (
            AlertMetric::RetryAmplification,
            result.metric_delta.retry_amplification_factor,
        ),
    ])
}

/// Decides whether an alert rule would fire on a set of metric values
pub trait AlertEvaluator: Send + Sync {
    fn would_fire(&self, rule: &AlertRule, metric_values: &MetricValues) -> bool;
}

/// Fires when the watched value is strictly above the rule threshold.
/// A missing value never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdAlertEvaluator;

impl AlertEvaluator for ThresholdAlertEvaluator {
    fn would_fire(&self, rule: &AlertRule, metric_values: &MetricValues) -> bool {
        metric_values
            .get(&rule.metric)
            .is_some_and(|value| *value > rule.threshold)
    }
}
