//! Per-dependency circuit breaker registry

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// A breaker state change expressed relative to the registry epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub dependency: String,
    pub state: CircuitState,
    /// Seconds since the registry epoch on the monotonic clock
    pub at_seconds: f64,
}

/// Registry handing out one breaker per dependency name.
///
/// Registries share nothing with each other; building one per scenario (or per
/// simulated instance) gives each its own breaker state.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    epoch: Instant,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_epoch(config, Instant::now())
    }

    /// Create a registry whose transition timestamps are measured from `epoch`.
    ///
    /// Registries that share an epoch produce directly comparable timestamps.
    pub fn with_epoch(config: CircuitBreakerConfig, epoch: Instant) -> Self {
        Self {
            config,
            epoch,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get the breaker for `name`, creating it on first use
    pub fn get(&self, name: &str) -> CircuitBreaker {
        self.breakers
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .clone()
    }

    pub fn state(&self, name: &str) -> Option<CircuitState> {
        self.breakers.lock().get(name).map(|breaker| breaker.state())
    }

    pub fn states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers
            .lock()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }

    /// Every transition of every breaker, ordered by time
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        let breakers: Vec<(String, CircuitBreaker)> = self
            .breakers
            .lock()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.clone()))
            .collect();

        let mut records: Vec<TransitionRecord> = breakers
            .into_iter()
            .flat_map(|(name, breaker)| {
                breaker
                    .transitions()
                    .into_iter()
                    .map(move |transition| TransitionRecord {
                        dependency: name.clone(),
                        state: transition.state,
                        at_seconds: transition
                            .at
                            .saturating_duration_since(self.epoch)
                            .as_secs_f64(),
                    })
            })
            .collect();

        records.sort_by(|a, b| a.at_seconds.total_cmp(&b.at_seconds));
        records
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
