//! Seeded fault injection around a dependency call

use futures::FutureExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strain_resilience::{CallError, CallFn, FailureMode, FaultInjector};
use tokio::time::sleep;
use tracing::trace;

use crate::error::{HarnessError, HarnessResult};

/// Which failure to inject, how often, and into which dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionConfig {
    pub failure_mode: FailureMode,
    pub injection_rate: f64,
    #[serde(default)]
    pub target_dependency: String,
    #[serde(default)]
    pub seed: u64,
}

impl InjectionConfig {
    pub fn new(
        failure_mode: FailureMode,
        injection_rate: f64,
        target_dependency: impl Into<String>,
        seed: u64,
    ) -> HarnessResult<Self> {
        let config = Self {
            failure_mode,
            injection_rate,
            target_dependency: target_dependency.into(),
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse a failure mode name, reporting unknown names as configuration errors
    pub fn parse_mode(mode: &str) -> HarnessResult<FailureMode> {
        mode.parse::<FailureMode>()
            .map_err(|e| HarnessError::InvalidInjection(e.to_string()))
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if !self.injection_rate.is_finite() || !(0.0..=1.0).contains(&self.injection_rate) {
            return Err(HarnessError::InvalidInjection(format!(
                "injection_rate must be within [0, 1], got {}",
                self.injection_rate
            )));
        }
        if self.target_dependency.trim().is_empty() {
            return Err(HarnessError::InvalidInjection(
                "target_dependency cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with another seed (used to derive per-instance seeds)
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }

    /// Name of the fault-injector point guarding this config
    pub fn injection_point(&self) -> String {
        format!("dependency:{}", self.target_dependency)
    }
}

/// Counters kept by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjectionStats {
    pub failure_mode: FailureMode,
    /// Calls that drew a decision
    pub decisions: u64,
    /// Calls that received the failure
    pub injected: u64,
}

/// Decides per call whether to inject a failure.
///
/// Each adapter owns its RNG, seeded from the config, and draws exactly once
/// per armed call. The same seed, rate and call count therefore always yield
/// the same sequence of decisions.
pub struct FaultInjectionAdapter {
    config: InjectionConfig,
    timeout: Duration,
    rng: Mutex<StdRng>,
    gate: Option<FaultInjector>,
    decisions: AtomicU64,
    injected: AtomicU64,
}

impl FaultInjectionAdapter {
    /// `timeout_seconds` is the call timeout the injected failures are sized
    /// against.
    pub fn new(config: InjectionConfig, timeout_seconds: f64) -> HarnessResult<Self> {
        config.validate()?;
        if !timeout_seconds.is_finite() || timeout_seconds <= 0.0 {
            return Err(HarnessError::InvalidInjection(format!(
                "timeout_seconds must be positive, got {}",
                timeout_seconds
            )));
        }

        Ok(Self {
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            timeout: Duration::from_secs_f64(timeout_seconds),
            config,
            gate: None,
            decisions: AtomicU64::new(0),
            injected: AtomicU64::new(0),
        })
    }

    /// Only inject while the config's point is enabled on `injector`
    pub fn gated_by(mut self, injector: FaultInjector) -> Self {
        self.gate = Some(injector);
        self
    }

    pub fn config(&self) -> &InjectionConfig {
        &self.config
    }

    /// Draw the next decision
    pub fn decide(&self) -> bool {
        let draw: f64 = self.rng.lock().gen();
        self.decisions.fetch_add(1, Ordering::Relaxed);
        draw < self.config.injection_rate
    }

    pub fn stats(&self) -> InjectionStats {
        InjectionStats {
            failure_mode: self.config.failure_mode,
            decisions: self.decisions.load(Ordering::Relaxed),
            injected: self.injected.load(Ordering::Relaxed),
        }
    }

    /// Wrap `base` so that each invocation may receive the configured failure
    pub fn wrap(self: &Arc<Self>, base: CallFn) -> CallFn {
        let adapter = Arc::clone(self);
        Arc::new(move || {
            let adapter = Arc::clone(&adapter);
            let base = Arc::clone(&base);
            async move { adapter.invoke(&base).await }.boxed()
        })
    }

    fn is_armed(&self) -> bool {
        match &self.gate {
            Some(injector) => injector.is_enabled(&self.config.injection_point()),
            None => true,
        }
    }

    async fn invoke(&self, base: &CallFn) -> Result<(), CallError> {
        if !self.is_armed() || !self.decide() {
            return base().await;
        }

        self.injected.fetch_add(1, Ordering::Relaxed);
        let target = &self.config.target_dependency;
        trace!(mode = %self.config.failure_mode, dependency = %target, "Injecting failure");

        match self.config.failure_mode {
            FailureMode::Timeout => {
                sleep(self.timeout.mul_f64(1.5)).await;
                Err(CallError::Timeout(format!("injected timeout on {}", target)))
            }
            FailureMode::ErrorResponse => Err(CallError::ErrorResponse(format!(
                "injected error response from {}",
                target
            ))),
            FailureMode::ConnectionError => Err(CallError::Connection(format!(
                "injected connection failure to {}",
                target
            ))),
            FailureMode::DoubleLatency => {
                sleep(self.timeout.mul_f64(0.8)).await;
                Ok(())
            }
        }
    }
}

/// Wrap `base` with a fresh adapter built from `config`
pub fn wrap(base: CallFn, config: InjectionConfig, timeout_seconds: f64) -> HarnessResult<CallFn> {
    let adapter = Arc::new(FaultInjectionAdapter::new(config, timeout_seconds)?);
    Ok(adapter.wrap(base))
}
