//! Stress reports and tuning recommendations
//!
//! A report never fails: missing pieces of its input simply produce empty
//! sections, zeroes and `false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use strain_config::{HarnessConfig, ReportConfig};
use strain_resilience::{CircuitState, FailureMode};
use tracing::{debug, info};

use crate::alert::{metric_values, AlertEvaluator, AlertMetric, AlertRule, ThresholdAlertEvaluator};
use crate::divergence::DivergenceResult;
use crate::error::HarnessResult;
use crate::profile::ProfileKind;
use crate::scenario::ScenarioResult;

/// A suggested change to one tunable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningRecommendation {
    pub parameter: String,
    pub current_value: f64,
    pub recommended_value: f64,
    pub reason: String,
}

/// One line of the metrics table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsRow {
    pub scenario: String,
    pub instance: Option<usize>,
    pub profile: ProfileKind,
    pub failure_mode: Option<FailureMode>,
    pub injection_rate: f64,
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub error_rate: f64,
    pub target_rps: u64,
    pub actual_rps: f64,
    pub p95_latency_ms: f64,
    pub total_retries: u64,
    pub retry_amplification_factor: f64,
    pub cb_state: Option<CircuitState>,
    pub is_write: bool,
}

impl From<&ScenarioResult> for MetricsRow {
    fn from(result: &ScenarioResult) -> Self {
        let load = &result.load_result;
        Self {
            scenario: result.name.clone(),
            instance: result.instance,
            profile: result.profile.kind,
            failure_mode: result.injection_config.as_ref().map(|c| c.failure_mode),
            injection_rate: result.injection_rate(),
            total_requests: load.total_requests,
            successful: load.successful,
            failed: load.failed,
            error_rate: load.error_rate(),
            target_rps: load.target_rps,
            actual_rps: load.actual_rps,
            p95_latency_ms: load.p95_latency_ms,
            total_retries: result.metric_delta.total_retries,
            retry_amplification_factor: result.metric_delta.retry_amplification_factor,
            cb_state: result.target_state(),
            is_write: result.is_write,
        }
    }
}

/// Evidence linking a flaky test to load-generator timing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlakyCorrelationSegment {
    pub timing_deviation_ms: f64,
    pub suspected_source: String,
    pub repro_steps: Vec<String>,
}

/// Aggregated outcome of a set of scenarios
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressReport {
    pub results: Vec<ScenarioResult>,
    pub metrics_table: Vec<MetricsRow>,
    pub cb_tuning: Vec<TuningRecommendation>,
    pub retry_tuning: Vec<TuningRecommendation>,
    pub alert_tuning: Vec<TuningRecommendation>,
    pub write_path_safe: bool,
    pub flaky_test_correlation: Option<FlakyCorrelationSegment>,
    pub divergences: Vec<DivergenceResult>,
    pub generated_at: DateTime<Utc>,
}

impl StressReport {
    pub fn to_json(&self) -> HarnessResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> HarnessResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Every recommendation in the report
    pub fn recommendations(&self) -> impl Iterator<Item = &TuningRecommendation> {
        self.cb_tuning
            .iter()
            .chain(&self.retry_tuning)
            .chain(&self.alert_tuning)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Stress report");
        let _ = writeln!(out);
        let _ = writeln!(out, "Generated at {}", self.generated_at.to_rfc3339());
        let _ = writeln!(out);

        let _ = writeln!(out, "## Metrics");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "| Scenario | Profile | Injection | Requests | Failed | Error rate | RPS (actual/target) | p95 ms | Retries | Amplification | Breaker | Write |"
        );
        let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|---|---|---|");
        for row in &self.metrics_table {
            let scenario = match row.instance {
                Some(instance) => format!("{} #{}", row.scenario, instance),
                None => row.scenario.clone(),
            };
            let injection = match row.failure_mode {
                Some(mode) => format!("{} @ {:.0}%", mode, row.injection_rate * 100.0),
                None => "none".to_string(),
            };
            let breaker = row
                .cb_state
                .map(|state| state.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {:.3} | {:.1}/{} | {:.1} | {} | {:.3} | {} | {} |",
                scenario,
                row.profile,
                injection,
                row.total_requests,
                row.failed,
                row.error_rate,
                row.actual_rps,
                row.target_rps,
                row.p95_latency_ms,
                row.total_retries,
                row.retry_amplification_factor,
                breaker,
                if row.is_write { "yes" } else { "no" },
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Tuning recommendations");
        let _ = writeln!(out);
        let mut any = false;
        for recommendation in self.recommendations() {
            any = true;
            let _ = writeln!(
                out,
                "- `{}`: {} -> {} ({})",
                recommendation.parameter,
                recommendation.current_value,
                recommendation.recommended_value,
                recommendation.reason
            );
        }
        if !any {
            let _ = writeln!(out, "None.");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "## Write path");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{}",
            if self.write_path_safe {
                "Safe: no write scenario retried."
            } else {
                "UNSAFE: a write scenario retried calls."
            }
        );

        if !self.divergences.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Breaker divergence");
            let _ = writeln!(out);
            for divergence in &self.divergences {
                let _ = writeln!(
                    out,
                    "- {} #{} vs #{}: {:.3}s raw, {:.3}s compensated (limit {:.1}s)",
                    divergence.scenario,
                    divergence.instance_a,
                    divergence.instance_b,
                    divergence.raw_seconds,
                    divergence.compensated_seconds,
                    divergence.cb_open_duration_seconds * 2.0
                );
            }
        }

        if let Some(flaky) = &self.flaky_test_correlation {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Flaky test correlation");
            let _ = writeln!(out);
            let _ = writeln!(out, "Timing deviation: {:.1} ms", flaky.timing_deviation_ms);
            let _ = writeln!(out, "Suspected source: {}", flaky.suspected_source);
            let _ = writeln!(out);
            for (step, text) in flaky.repro_steps.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", step + 1, text);
            }
        }

        out
    }
}

/// Builds [`StressReport`]s
pub struct ReportGenerator {
    config: ReportConfig,
    retry_max_attempts: u32,
    evaluator: Box<dyn AlertEvaluator>,
    rules: Vec<AlertRule>,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl ReportGenerator {
    pub fn new(config: ReportConfig, retry_max_attempts: u32) -> Self {
        let rules = AlertRule::defaults(&config.alerts);
        Self {
            config,
            retry_max_attempts,
            evaluator: Box::new(ThresholdAlertEvaluator),
            rules,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.report.clone(), config.resilience.retry.max_attempts)
    }

    pub fn with_evaluator(mut self, evaluator: Box<dyn AlertEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn generate(
        &self,
        results: Vec<ScenarioResult>,
        divergences: Option<Vec<DivergenceResult>>,
    ) -> StressReport {
        let divergences = divergences.unwrap_or_default();

        let report = StressReport {
            metrics_table: results.iter().map(MetricsRow::from).collect(),
            cb_tuning: cb_tuning(&divergences),
            retry_tuning: self.retry_tuning(&results),
            alert_tuning: self.alert_tuning(&results),
            write_path_safe: write_path_safe(&results),
            flaky_test_correlation: self.flaky_correlation(&results),
            divergences,
            generated_at: Utc::now(),
            results,
        };

        info!(
            scenarios = report.results.len(),
            recommendations = report.recommendations().count(),
            write_path_safe = report.write_path_safe,
            flaky = report.flaky_test_correlation.is_some(),
            "Stress report generated"
        );
        report
    }

    fn retry_tuning(&self, results: &[ScenarioResult]) -> Vec<TuningRecommendation> {
        let limit = self.config.retry_amplification_limit;
        let amplified: Vec<&ScenarioResult> = results
            .iter()
            .filter(|result| result.metric_delta.retry_amplification_factor > limit)
            .collect();

        let Some(worst) = amplified.iter().max_by(|a, b| {
            a.metric_delta
                .retry_amplification_factor
                .total_cmp(&b.metric_delta.retry_amplification_factor)
        }) else {
            return Vec::new();
        };

        let names: Vec<&str> = amplified.iter().map(|result| result.name.as_str()).collect();
        vec![TuningRecommendation {
            parameter: "resilience.retry.max_attempts".to_string(),
            current_value: f64::from(self.retry_max_attempts),
            recommended_value: f64::from(self.retry_max_attempts.saturating_sub(1).max(1)),
            reason: format!(
                "retries amplified traffic up to {:.2}x (limit {:.2}) in: {}",
                worst.metric_delta.retry_amplification_factor,
                limit,
                names.join(", ")
            ),
        }]
    }

    fn alert_tuning(&self, results: &[ScenarioResult]) -> Vec<TuningRecommendation> {
        let mut recommendations = Vec::new();

        for rule in &self.rules {
            let mut raise: Option<(f64, &str)> = None;
            let mut lower: Option<(f64, &str)> = None;

            for result in results {
                let values = metric_values(result);
                let observed = values.get(&rule.metric).copied().unwrap_or(0.0);
                let fired = self.evaluator.would_fire(rule, &values);

                if fired && result.injection_config.is_none() {
                    if raise.map_or(true, |(worst, _)| observed > worst) {
                        raise = Some((observed, result.name.as_str()));
                    }
                } else if !fired
                    && rule.metric == AlertMetric::ErrorRate
                    && produces_errors(result)
                    && result.injection_rate() >= self.config.alert_min_injection_rate
                {
                    let expected = if observed > 0.0 {
                        observed
                    } else {
                        result.injection_rate()
                    };
                    if lower.map_or(true, |(least, _)| expected < least) {
                        lower = Some((expected, result.name.as_str()));
                    }
                }
            }

            if let Some((observed, scenario)) = raise {
                recommendations.push(TuningRecommendation {
                    parameter: format!("alerts.{}", rule.name),
                    current_value: rule.threshold,
                    recommended_value: observed * 1.2,
                    reason: format!(
                        "fired without injected failures in '{}' ({} = {:.3})",
                        scenario, rule.metric, observed
                    ),
                });
            }
            if let Some((expected, scenario)) = lower {
                recommendations.push(TuningRecommendation {
                    parameter: format!("alerts.{}", rule.name),
                    current_value: rule.threshold,
                    recommended_value: expected * 0.8,
                    reason: format!(
                        "stayed silent while '{}' injected failures ({} = {:.3})",
                        scenario, rule.metric, expected
                    ),
                });
            }
        }
        recommendations
    }

    fn flaky_correlation(&self, results: &[ScenarioResult]) -> Option<FlakyCorrelationSegment> {
        let worst = results.iter().max_by(|a, b| {
            a.load_result
                .schedule_deviation_ms
                .total_cmp(&b.load_result.schedule_deviation_ms)
        })?;

        let deviation = worst.load_result.schedule_deviation_ms;
        if deviation <= self.config.flaky_threshold_ms {
            debug!(deviation_ms = deviation, "Scheduling deviation within threshold");
            return None;
        }

        let suspected_source = if worst.load_result.p95_latency_ms >= deviation {
            format!(
                "slow responses from '{}' ({:.1} ms p95) held load windows open in '{}'",
                worst.target_dependency, worst.load_result.p95_latency_ms, worst.name
            )
        } else {
            format!(
                "load generator fell behind its schedule in '{}' ({:.1} of {} rps achieved)",
                worst.name, worst.load_result.actual_rps, worst.load_result.target_rps
            )
        };

        Some(FlakyCorrelationSegment {
            timing_deviation_ms: deviation,
            suspected_source,
            repro_steps: repro_steps(worst, self.config.flaky_threshold_ms),
        })
    }
}

/// Build a report with default configuration
pub fn generate(
    results: Vec<ScenarioResult>,
    divergences: Option<Vec<DivergenceResult>>,
) -> StressReport {
    ReportGenerator::default().generate(results, divergences)
}

fn cb_tuning(divergences: &[DivergenceResult]) -> Vec<TuningRecommendation> {
    let Some(worst) = divergences
        .iter()
        .filter(|divergence| divergence.exceeds_threshold())
        .max_by(|a, b| a.compensated_seconds.total_cmp(&b.compensated_seconds))
    else {
        return Vec::new();
    };

    vec![TuningRecommendation {
        parameter: "resilience.circuit_breaker.open_duration".to_string(),
        current_value: worst.cb_open_duration_seconds,
        recommended_value: (worst.compensated_seconds / 2.0).ceil(),
        reason: format!(
            "instances #{} and #{} of '{}' opened {:.3}s apart, more than twice the open duration",
            worst.instance_a, worst.instance_b, worst.scenario, worst.compensated_seconds
        ),
    }]
}

/// No write scenario may have retried
pub fn write_path_safe(results: &[ScenarioResult]) -> bool {
    results
        .iter()
        .filter(|result| result.is_write)
        .all(|result| result.metric_delta.total_retries == 0)
}

fn produces_errors(result: &ScenarioResult) -> bool {
    result
        .injection_config
        .as_ref()
        .is_some_and(|config| config.failure_mode != FailureMode::DoubleLatency)
}

fn repro_steps(result: &ScenarioResult, threshold_ms: f64) -> Vec<String> {
    let profile = &result.profile;
    let mut command = format!(
        "strain run {} --profile {} --scale {} --dependency {}",
        result.name, profile.kind, profile.scale_factor, result.target_dependency
    );
    if let Some(injection) = &result.injection_config {
        let _ = write!(
            command,
            " --failure-mode {} --rate {} --seed {}",
            injection.failure_mode, injection.injection_rate, injection.seed
        );
    }
    if result.is_write {
        command.push_str(" --write");
    }

    vec![
        command,
        "Re-run with RUST_LOG=strain_harness=debug to log every window overrun".to_string(),
        format!(
            "Compare load_result.schedule_deviation_ms with the {:.0} ms threshold across runs",
            threshold_ms
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MetricDelta;
    use crate::injection::InjectionConfig;
    use crate::load::LoadResult;
    use std::collections::BTreeMap;

    fn result(name: &str) -> ScenarioResult {
        ScenarioResult {
            name: name.to_string(),
            target_dependency: "primary".to_string(),
            load_result: LoadResult {
                total_requests: 100,
                successful: 100,
                target_rps: 50,
                actual_rps: 49.5,
                ..LoadResult::default()
            },
            cb_states: BTreeMap::from([("primary".to_string(), CircuitState::Closed)]),
            ..ScenarioResult::default()
        }
    }

    fn with_injection(mut result: ScenarioResult, mode: FailureMode, rate: f64) -> ScenarioResult {
        result.injection_config = Some(InjectionConfig::new(mode, rate, "primary", 42).unwrap());
        result
    }

    #[test]
    fn test_metrics_table_preserves_order() {
        let report = generate(vec![result("b"), result("a"), result("c")], None);

        let names: Vec<&str> = report
            .metrics_table
            .iter()
            .map(|row| row.scenario.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        assert_eq!(report.metrics_table[0].cb_state, Some(CircuitState::Closed));
    }

    #[test]
    fn test_empty_input() {
        let report = generate(Vec::new(), None);

        assert!(report.metrics_table.is_empty());
        assert!(report.write_path_safe);
        assert!(report.flaky_test_correlation.is_none());
        assert_eq!(report.recommendations().count(), 0);
    }

    #[test]
    fn test_divergence_threshold_drives_cb_tuning() {
        let divergence = |compensated: f64| DivergenceResult {
            scenario: "timeout_40".to_string(),
            instance_a: 0,
            instance_b: 1,
            raw_seconds: compensated,
            compensated_seconds: compensated,
            cb_open_duration_seconds: 60.0,
        };

        let report = generate(Vec::new(), Some(vec![divergence(150.0)]));
        assert_eq!(report.cb_tuning.len(), 1);
        assert_eq!(report.cb_tuning[0].current_value, 60.0);
        assert_eq!(report.cb_tuning[0].recommended_value, 75.0);

        let report = generate(Vec::new(), Some(vec![divergence(90.0)]));
        assert!(report.cb_tuning.is_empty());
        assert_eq!(report.divergences.len(), 1);
    }

    #[test]
    fn test_retry_tuning_above_limit() {
        let mut amplified = result("timeout_40");
        amplified.metric_delta = MetricDelta {
            total_calls: 100,
            total_retries: 150,
            retry_amplification_factor: 1.5,
            ..MetricDelta::default()
        };
        let mut modest = result("timeout_10");
        modest.metric_delta.retry_amplification_factor = 0.3;

        let report = generate(vec![modest.clone()], None);
        assert!(report.retry_tuning.is_empty());

        let report = generate(vec![modest, amplified], None);
        assert_eq!(report.retry_tuning.len(), 1);
        assert_eq!(report.retry_tuning[0].current_value, 3.0);
        assert_eq!(report.retry_tuning[0].recommended_value, 2.0);
        assert!(report.retry_tuning[0].reason.contains("timeout_40"));
    }

    #[test]
    fn test_write_path_safety() {
        let mut safe_write = result("write");
        safe_write.is_write = true;

        let mut retried_read = result("read");
        retried_read.metric_delta.total_retries = 12;

        assert!(generate(vec![safe_write.clone(), retried_read], None).write_path_safe);

        let mut unsafe_write = safe_write;
        unsafe_write.metric_delta.total_retries = 1;
        assert!(!generate(vec![unsafe_write], None).write_path_safe);
    }

    #[test]
    fn test_flaky_correlation_threshold() {
        let mut steady = result("steady");
        steady.load_result.schedule_deviation_ms = 100.0;
        assert!(generate(vec![steady.clone()], None)
            .flaky_test_correlation
            .is_none());

        let mut jittery = with_injection(result("jittery"), FailureMode::Timeout, 0.1);
        jittery.load_result.schedule_deviation_ms = 480.0;
        jittery.load_result.p95_latency_ms = 1500.0;

        let report = generate(vec![steady, jittery], None);
        let flaky = report.flaky_test_correlation.unwrap();
        assert_eq!(flaky.timing_deviation_ms, 480.0);
        assert!(flaky.suspected_source.contains("primary"));
        assert_eq!(flaky.repro_steps.len(), 3);
        assert!(flaky.repro_steps[0].contains("--failure-mode timeout"));
        assert!(flaky.repro_steps[0].contains("--seed 42"));
    }

    #[test]
    fn test_alert_fires_without_injection() {
        let mut noisy = result("baseline");
        noisy.load_result.successful = 90;
        noisy.load_result.failed = 10;

        let report = generate(vec![noisy], None);
        assert_eq!(report.alert_tuning.len(), 1);

        let recommendation = &report.alert_tuning[0];
        assert_eq!(recommendation.parameter, "alerts.high_error_rate");
        assert_eq!(recommendation.current_value, 0.05);
        assert!(recommendation.recommended_value > 0.1);
    }

    #[test]
    fn test_silent_alert_under_injection() {
        let mut masked = with_injection(result("timeout_40"), FailureMode::Timeout, 0.4);
        masked.load_result.successful = 98;
        masked.load_result.failed = 2;

        let report = generate(vec![masked], None);
        assert_eq!(report.alert_tuning.len(), 1);
        let recommendation = &report.alert_tuning[0];
        assert_eq!(recommendation.parameter, "alerts.high_error_rate");
        assert!(recommendation.recommended_value < 0.05);

        let slow = with_injection(result("slow"), FailureMode::DoubleLatency, 0.4);
        assert!(generate(vec![slow], None).alert_tuning.is_empty());

        let light = with_injection(result("light"), FailureMode::ErrorResponse, 0.05);
        assert!(generate(vec![light], None).alert_tuning.is_empty());
    }

    #[test]
    fn test_custom_evaluator() {
        struct AlwaysFires;
        impl AlertEvaluator for AlwaysFires {
            fn would_fire(&self, _rule: &AlertRule, _values: &crate::alert::MetricValues) -> bool {
                true
            }
        }

        let generator = ReportGenerator::default().with_evaluator(Box::new(AlwaysFires));
        let report = generator.generate(vec![result("baseline")], None);
        assert_eq!(report.alert_tuning.len(), 3);
    }

    #[test]
    fn test_partial_json_and_markdown() {
        let report = StressReport::from_json(r#"{"write_path_safe": true}"#).unwrap();
        assert!(report.results.is_empty());
        assert!(report.write_path_safe);

        let report = generate(vec![result("baseline")], None);
        let markdown = report.to_markdown();
        assert!(markdown.contains("| baseline | baseline | none | 100 | 0 |"));
        assert!(markdown.contains("Safe: no write scenario retried."));

        let json = report.to_json().unwrap();
        assert_eq!(StressReport::from_json(&json).unwrap(), report);
    }
}
