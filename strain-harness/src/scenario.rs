//! Scenario orchestration
//!
//! A scenario builds fresh metrics and breaker state, arms the process-wide
//! fault injector, drives a load profile through the dependency caller and
//! reports what changed. The injector lease is held for the whole scenario
//! and released on every exit path.

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use strain_config::HarnessConfig;
use strain_resilience::{
    call_fn, CallFn, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    DependencyCaller, DependencyPolicy, FaultInjector, InjectorLease, MetricsRegistry,
    TransitionRecord,
};
use tokio::time::{sleep, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::capture::{compute_delta, MetricDelta, MetricsCapture};
use crate::error::{HarnessError, HarnessResult};
use crate::injection::{FaultInjectionAdapter, InjectionConfig, InjectionStats};
use crate::load::{LoadDriver, LoadHarness, LoadResult};
use crate::profile::LoadProfile;
use crate::settings;

/// Everything one scenario run produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioResult {
    pub name: String,
    pub profile: LoadProfile,
    pub load_result: LoadResult,
    pub metric_delta: MetricDelta,
    /// Breaker state per dependency when the run ended
    pub cb_states: BTreeMap<String, CircuitState>,
    pub injection_config: Option<InjectionConfig>,
    pub injection_stats: Option<InjectionStats>,
    pub target_dependency: String,
    pub is_write: bool,
    /// Index within a multi-instance run
    pub instance: Option<usize>,
    /// Breaker transitions, seconds since the run epoch
    pub cb_transitions: Vec<TransitionRecord>,
}

impl ScenarioResult {
    /// Final breaker state of the target dependency
    pub fn target_state(&self) -> Option<CircuitState> {
        self.cb_states.get(&self.target_dependency).copied()
    }

    /// Configured injection rate, 0.0 without injection
    pub fn injection_rate(&self) -> f64 {
        self.injection_config
            .as_ref()
            .map(|config| config.injection_rate)
            .unwrap_or(0.0)
    }

    pub fn seed(&self) -> Option<u64> {
        self.injection_config.as_ref().map(|config| config.seed)
    }
}

/// An instance of a multi-instance run that did not produce a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceFailure {
    pub instance: usize,
    pub error: String,
}

/// Outcome of a multi-instance run: every instance either produced a result
/// or is listed as a failure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiInstanceRun {
    pub results: Vec<ScenarioResult>,
    pub failures: Vec<InstanceFailure>,
}

impl MultiInstanceRun {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// In-process stand-in for a real dependency
#[derive(Debug, Clone, Default)]
pub struct SimulatedDependency {
    latency: Duration,
    jitter: Duration,
}

impl SimulatedDependency {
    /// Responds immediately and always succeeds
    pub fn instant() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            jitter: Duration::ZERO,
        }
    }

    /// Add up to `jitter` of random extra latency per call
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn into_call(self) -> CallFn {
        call_fn(move || {
            let extra = if self.jitter.is_zero() {
                Duration::ZERO
            } else {
                Duration::from_micros(fastrand::u64(0..=self.jitter.as_micros() as u64))
            };
            let delay = self.latency + extra;
            async move {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                Ok(())
            }
        })
    }
}

/// What a single instance of a scenario runs
struct InstancePlan<'a> {
    name: &'a str,
    profile: &'a LoadProfile,
    injection: Option<InjectionConfig>,
    target_dependency: &'a str,
    is_write: bool,
    instance: Option<usize>,
    epoch: Instant,
}

/// Runs scenarios against one dependency call
pub struct ScenarioRunner {
    injector: FaultInjector,
    dependency: CallFn,
    driver: Arc<dyn LoadDriver>,
    breaker_config: CircuitBreakerConfig,
    policy: DependencyPolicy,
}

impl ScenarioRunner {
    /// Runner with default harness configuration
    pub fn new(injector: FaultInjector, dependency: CallFn) -> Self {
        Self::from_config(&HarnessConfig::default(), injector, dependency)
    }

    pub fn from_config(config: &HarnessConfig, injector: FaultInjector, dependency: CallFn) -> Self {
        Self {
            injector,
            dependency,
            driver: Arc::new(LoadHarness::from_config(&config.load)),
            breaker_config: settings::breaker_config(&config.resilience.circuit_breaker),
            policy: settings::dependency_policy(&config.resilience),
        }
    }

    /// Drive load with something other than the default [`LoadHarness`]
    pub fn with_driver(mut self, driver: Arc<dyn LoadDriver>) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_breaker_config(mut self, breaker_config: CircuitBreakerConfig) -> Self {
        self.breaker_config = breaker_config;
        self
    }

    pub fn with_policy(mut self, policy: DependencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn injector(&self) -> &FaultInjector {
        &self.injector
    }

    pub fn breaker_config(&self) -> &CircuitBreakerConfig {
        &self.breaker_config
    }

    /// Run one scenario with isolated state.
    ///
    /// Configuration problems are reported before any load is generated. The
    /// injector is disarmed and reset when this returns, fails or panics.
    pub async fn run_scenario(
        &self,
        name: &str,
        profile: &LoadProfile,
        injection: Option<&InjectionConfig>,
        target_dependency: &str,
        is_write: bool,
    ) -> HarnessResult<ScenarioResult> {
        validate_request(profile, injection, target_dependency)?;

        let lease = self.injector.acquire().await;
        arm(&lease, injection)?;

        let plan = InstancePlan {
            name,
            profile,
            injection: injection.cloned(),
            target_dependency,
            is_write,
            instance: None,
            epoch: Instant::now(),
        };
        let outcome = self
            .run_instance(plan)
            .instrument(info_span!("scenario", scenario = name))
            .await;
        drop(lease);

        if let Err(error) = &outcome {
            error!(scenario = name, error = %error, "Scenario failed");
        }
        outcome
    }

    /// Run `instance_count` independent instances of a scenario concurrently.
    ///
    /// Instance `i` injects with seed `seed + i`. Every instance runs to
    /// completion; failures (including panics) are collected next to the
    /// successful results. Transition timestamps share one epoch.
    pub async fn run_multi_instance_scenario(
        &self,
        name: &str,
        profile: &LoadProfile,
        injection: &InjectionConfig,
        instance_count: usize,
    ) -> HarnessResult<MultiInstanceRun> {
        if instance_count == 0 {
            return Err(HarnessError::InvalidScenario(
                "instance_count must be at least 1".to_string(),
            ));
        }
        let target_dependency = injection.target_dependency.as_str();
        validate_request(profile, Some(injection), target_dependency)?;

        let lease = self.injector.acquire().await;
        arm(&lease, Some(injection))?;

        let epoch = Instant::now();
        let instances = (0..instance_count).map(|index| {
            let plan = InstancePlan {
                name,
                profile,
                injection: Some(injection.with_seed(injection.seed.wrapping_add(index as u64))),
                target_dependency,
                is_write: false,
                instance: Some(index),
                epoch,
            };
            let span = info_span!("scenario", scenario = name, instance = index);
            async move {
                let outcome = AssertUnwindSafe(self.run_instance(plan).instrument(span))
                    .catch_unwind()
                    .await;
                (index, outcome)
            }
        });
        let outcomes = join_all(instances).await;
        drop(lease);

        let mut run = MultiInstanceRun::default();
        for (instance, outcome) in outcomes {
            let error = match outcome {
                Ok(Ok(result)) => {
                    run.results.push(result);
                    continue;
                }
                Ok(Err(error)) => error.to_string(),
                Err(panic) => format!("instance panicked: {}", panic_message(panic.as_ref())),
            };
            warn!(scenario = name, instance, error = %error, "Instance failed");
            run.failures.push(InstanceFailure { instance, error });
        }

        info!(
            scenario = name,
            completed = run.results.len(),
            failed = run.failures.len(),
            "Multi-instance scenario finished"
        );
        Ok(run)
    }

    async fn run_instance(&self, plan: InstancePlan<'_>) -> HarnessResult<ScenarioResult> {
        let capture = MetricsCapture::new(
            Arc::new(MetricsRegistry::new()),
            Arc::new(CircuitBreakerRegistry::with_epoch(
                self.breaker_config.clone(),
                plan.epoch,
            )),
        );
        let caller = Arc::new(DependencyCaller::new(
            plan.target_dependency,
            capture.breakers(),
            Arc::clone(capture.metrics()),
            self.policy.clone(),
        ));

        // Injected failures are sized against the caller's own timeout, so
        // timeouts trip it and slow responses stay under it.
        let adapter = match &plan.injection {
            Some(config) => Some(Arc::new(
                FaultInjectionAdapter::new(config.clone(), self.policy.timeout.as_secs_f64())?
                    .gated_by(self.injector.clone()),
            )),
            None => None,
        };
        let target = match &adapter {
            Some(adapter) => adapter.wrap(Arc::clone(&self.dependency)),
            None => Arc::clone(&self.dependency),
        };

        let is_write = plan.is_write;
        let call: CallFn = Arc::new(move || {
            let caller = Arc::clone(&caller);
            let target = Arc::clone(&target);
            async move { caller.call(&target, is_write).await }.boxed()
        });

        info!(
            dependency = plan.target_dependency,
            is_write,
            injection = ?plan.injection,
            "Running scenario"
        );

        let before = capture.snapshot();
        let load_result = self.driver.run_profile(plan.profile, call).await?;
        let after = capture.snapshot();
        let metric_delta = compute_delta(&before, &after);

        let result = ScenarioResult {
            name: plan.name.to_string(),
            profile: plan.profile.clone(),
            load_result,
            metric_delta,
            cb_states: capture.breakers().states(),
            injection_config: plan.injection,
            injection_stats: adapter.map(|adapter| adapter.stats()),
            target_dependency: plan.target_dependency.to_string(),
            is_write,
            instance: plan.instance,
            cb_transitions: capture.breakers().transitions(),
        };

        info!(
            total = result.load_result.total_requests,
            failed = result.load_result.failed,
            retries = result.metric_delta.total_retries,
            state = ?result.target_state(),
            "Scenario finished"
        );
        Ok(result)
    }
}

fn validate_request(
    profile: &LoadProfile,
    injection: Option<&InjectionConfig>,
    target_dependency: &str,
) -> HarnessResult<()> {
    profile.validate()?;

    if target_dependency.trim().is_empty() {
        return Err(HarnessError::InvalidScenario(
            "target_dependency cannot be empty".to_string(),
        ));
    }

    if let Some(injection) = injection {
        injection.validate()?;
        if injection.target_dependency != target_dependency {
            return Err(HarnessError::InvalidInjection(format!(
                "injection targets '{}' but the scenario calls '{}'",
                injection.target_dependency, target_dependency
            )));
        }
    }
    Ok(())
}

fn arm(lease: &InjectorLease, injection: Option<&InjectionConfig>) -> HarnessResult<()> {
    if let Some(injection) = injection {
        lease.configure(
            &injection.injection_point(),
            injection.injection_rate,
            injection.failure_mode,
        )?;
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
