//! Circuit-breaker timing divergence between independent instances

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strain_config::HarnessConfig;
use strain_resilience::{CircuitState, TransitionRecord};

use crate::scenario::ScenarioResult;

/// Seconds of the first OPEN transition in a list, if any
pub fn first_open(transitions: &[TransitionRecord]) -> Option<f64> {
    transitions
        .iter()
        .find(|record| record.state == CircuitState::Open)
        .map(|record| record.at_seconds)
}

/// Skew-compensated gap between the first OPEN transitions of two instances.
///
/// Returns 0.0 when either list never opened.
pub fn compute_divergence(
    transitions_a: &[TransitionRecord],
    transitions_b: &[TransitionRecord],
    max_clock_skew_seconds: f64,
) -> f64 {
    match (first_open(transitions_a), first_open(transitions_b)) {
        (Some(a), Some(b)) => compensate((a - b).abs(), max_clock_skew_seconds),
        _ => 0.0,
    }
}

fn compensate(raw_seconds: f64, max_clock_skew_seconds: f64) -> f64 {
    (raw_seconds - max_clock_skew_seconds).max(0.0)
}

/// Divergence measured between two instances of one scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceResult {
    pub scenario: String,
    pub instance_a: usize,
    pub instance_b: usize,
    pub raw_seconds: f64,
    pub compensated_seconds: f64,
    pub cb_open_duration_seconds: f64,
}

impl DivergenceResult {
    /// Instances disagree by more than two open periods
    pub fn exceeds_threshold(&self) -> bool {
        self.compensated_seconds > self.cb_open_duration_seconds * 2.0
    }
}

/// Compares breaker transitions across the instances of multi-instance runs
#[derive(Debug, Clone)]
pub struct DivergenceAnalyzer {
    max_clock_skew_seconds: f64,
    cb_open_duration_seconds: f64,
}

impl DivergenceAnalyzer {
    pub fn new(max_clock_skew_seconds: f64, cb_open_duration_seconds: f64) -> Self {
        Self {
            max_clock_skew_seconds,
            cb_open_duration_seconds,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.divergence.max_clock_skew_seconds,
            config.resilience.circuit_breaker.open_duration.as_secs_f64(),
        )
    }

    /// Build a result from a raw gap between first OPEN transitions
    pub fn measure(
        &self,
        scenario: impl Into<String>,
        instance_a: usize,
        instance_b: usize,
        raw_seconds: f64,
    ) -> DivergenceResult {
        DivergenceResult {
            scenario: scenario.into(),
            instance_a,
            instance_b,
            raw_seconds,
            compensated_seconds: compensate(raw_seconds, self.max_clock_skew_seconds),
            cb_open_duration_seconds: self.cb_open_duration_seconds,
        }
    }

    /// Compare two instances on their target dependency.
    ///
    /// `None` when either instance never opened its breaker.
    pub fn compare(&self, a: &ScenarioResult, b: &ScenarioResult) -> Option<DivergenceResult> {
        let open_a = first_open(&target_transitions(a))?;
        let open_b = first_open(&target_transitions(b))?;

        Some(self.measure(
            a.name.clone(),
            a.instance.unwrap_or_default(),
            b.instance.unwrap_or_default(),
            (open_a - open_b).abs(),
        ))
    }

    /// Compare the first instance of every multi-instance scenario with each
    /// of its other instances
    pub fn analyze(&self, results: &[ScenarioResult]) -> Vec<DivergenceResult> {
        let mut runs: BTreeMap<&str, Vec<&ScenarioResult>> = BTreeMap::new();
        for result in results.iter().filter(|result| result.instance.is_some()) {
            runs.entry(result.name.as_str()).or_default().push(result);
        }

        let mut divergences = Vec::new();
        for (name, mut instances) in runs {
            instances.sort_by_key(|result| result.instance);
            let Some((reference, others)) = instances.split_first() else {
                continue;
            };
            for other in others {
                match self.compare(reference, other) {
                    Some(divergence) => divergences.push(divergence),
                    None => tracing::debug!(
                        scenario = name,
                        instance = other.instance.unwrap_or_default(),
                        "Breaker never opened on one side, skipping divergence"
                    ),
                }
            }
        }
        divergences
    }
}

fn target_transitions(result: &ScenarioResult) -> Vec<TransitionRecord> {
    result
        .cb_transitions
        .iter()
        .filter(|record| record.dependency == result.target_dependency)
        .cloned()
        .collect()
}
