//! Per-dependency call metrics collector

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Final outcome of one logical dependency call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    CircuitOpen,
}

/// Point-in-time counters for one dependency
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyCounters {
    pub success: u64,
    pub failure: u64,
    pub timeout: u64,
    pub circuit_open: u64,
    /// Attempts issued beyond the first one
    pub retries: u64,
}

impl DependencyCounters {
    /// Logical calls across every outcome
    pub fn total_calls(&self) -> u64 {
        self.success + self.failure + self.timeout + self.circuit_open
    }
}

#[derive(Debug, Default)]
struct DependencyStats {
    success: AtomicU64,
    failure: AtomicU64,
    timeout: AtomicU64,
    circuit_open: AtomicU64,
    retries: AtomicU64,
}

impl DependencyStats {
    fn counters(&self) -> DependencyCounters {
        DependencyCounters {
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            circuit_open: self.circuit_open.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe metrics registry.
///
/// Each registry is an isolated namespace: two registries never observe each
/// other's counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    dependencies: RwLock<HashMap<String, Arc<DependencyStats>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the final outcome of a logical call
    pub fn record_outcome(&self, dependency: &str, outcome: CallOutcome) {
        let stats = self.stats(dependency);
        let counter = match outcome {
            CallOutcome::Success => &stats.success,
            CallOutcome::Failure => &stats.failure,
            CallOutcome::Timeout => &stats.timeout,
            CallOutcome::CircuitOpen => &stats.circuit_open,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one retry attempt
    pub fn record_retry(&self, dependency: &str) {
        self.stats(dependency).retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters for one dependency (all zero if it was never seen)
    pub fn counters(&self, dependency: &str) -> DependencyCounters {
        self.dependencies
            .read()
            .get(dependency)
            .map(|stats| stats.counters())
            .unwrap_or_default()
    }

    /// Counters for every dependency seen so far, ordered by name
    pub fn snapshot(&self) -> BTreeMap<String, DependencyCounters> {
        self.dependencies
            .read()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.counters()))
            .collect()
    }

    fn stats(&self, dependency: &str) -> Arc<DependencyStats> {
        if let Some(stats) = self.dependencies.read().get(dependency) {
            return Arc::clone(stats);
        }
        let mut dependencies = self.dependencies.write();
        Arc::clone(dependencies.entry(dependency.to_string()).or_default())
    }
}
