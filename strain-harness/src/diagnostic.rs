//! Assertions over scenario results that fail with a reproducible diagnostic

use serde::{Deserialize, Serialize};
use strain_resilience::CircuitState;
use thiserror::Error;

use crate::scenario::ScenarioResult;

/// A failed expectation, with enough context to reproduce it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Error)]
#[serde(default)]
#[error(
    "FAIL scenario={scenario_id} dependency={dependency} outcome={outcome} observed={observed} expected={expected} seed={}",
    .seed.map(|seed| seed.to_string()).unwrap_or_else(|| "none".to_string())
)]
pub struct FailDiagnostic {
    pub scenario_id: String,
    pub dependency: String,
    pub outcome: String,
    pub observed: String,
    pub expected: String,
    pub seed: Option<u64>,
}

impl FailDiagnostic {
    pub fn new(
        scenario_id: impl Into<String>,
        dependency: impl Into<String>,
        outcome: impl Into<String>,
        observed: impl ToString,
        expected: impl Into<String>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            dependency: dependency.into(),
            outcome: outcome.into(),
            observed: observed.to_string(),
            expected: expected.into(),
            seed,
        }
    }

    pub fn for_result(
        result: &ScenarioResult,
        outcome: impl Into<String>,
        observed: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        let scenario_id = match result.instance {
            Some(instance) => format!("{}#{}", result.name, instance),
            None => result.name.clone(),
        };
        Self {
            scenario_id,
            dependency: result.target_dependency.clone(),
            outcome: outcome.into(),
            observed: observed.to_string(),
            expected: expected.into(),
            seed: result.seed(),
        }
    }
}

pub type CheckResult = Result<(), FailDiagnostic>;

/// `total_requests == successful + failed` and `circuit_open_rejected <= failed`
pub fn check_count_invariant(result: &ScenarioResult) -> CheckResult {
    let load = &result.load_result;
    if load.is_consistent() {
        return Ok(());
    }
    Err(FailDiagnostic::for_result(
        result,
        "count_invariant",
        format!(
            "total={} successful={} failed={} circuit_open={}",
            load.total_requests, load.successful, load.failed, load.circuit_open_rejected
        ),
        "total == successful + failed, circuit_open <= failed",
    ))
}

/// Achieved rate within `tolerance` of the scheduled rate
pub fn check_rps_tolerance(result: &ScenarioResult, tolerance: f64) -> CheckResult {
    let load = &result.load_result;
    if load.within_rps_tolerance(tolerance) {
        return Ok(());
    }
    Err(FailDiagnostic::for_result(
        result,
        "rps_tolerance",
        format!("{:.2} rps", load.actual_rps),
        format!("{} rps ±{:.0}%", load.target_rps, tolerance * 100.0),
    ))
}

/// Final breaker state of the target dependency
pub fn check_breaker_state(result: &ScenarioResult, expected: CircuitState) -> CheckResult {
    match result.target_state() {
        Some(state) if state == expected => Ok(()),
        observed => Err(FailDiagnostic::for_result(
            result,
            "breaker_state",
            observed
                .map(|state| state.to_string())
                .unwrap_or_else(|| "untouched".to_string()),
            expected.to_string(),
        )),
    }
}

/// Write scenarios must not have retried
pub fn check_write_path(result: &ScenarioResult) -> CheckResult {
    if !result.is_write || result.metric_delta.total_retries == 0 {
        return Ok(());
    }
    Err(FailDiagnostic::for_result(
        result,
        "write_retried",
        format!("{} retries", result.metric_delta.total_retries),
        "0 retries",
    ))
}

pub fn check_max_error_rate(result: &ScenarioResult, max_error_rate: f64) -> CheckResult {
    let error_rate = result.load_result.error_rate();
    if error_rate <= max_error_rate {
        return Ok(());
    }
    Err(FailDiagnostic::for_result(
        result,
        "error_rate",
        format!("{:.4}", error_rate),
        format!("<= {:.4}", max_error_rate),
    ))
}

/// Checks every result must pass regardless of the scenario
pub fn check_invariants(result: &ScenarioResult) -> Vec<FailDiagnostic> {
    [check_count_invariant(result), check_write_path(result)]
        .into_iter()
        .filter_map(Result::err)
        .collect()
}
