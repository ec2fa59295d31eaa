//! Concurrent load generation against a dependency call
//!
//! Traffic is generated in fixed windows: each window launches its share of
//! calls at once, waits for all of them, then sleeps out whatever is left of
//! the window. A window whose calls outlive it is recorded as a scheduling
//! overrun instead of being cut short.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use strain_config::LoadConfig;
use strain_resilience::CallFn;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::HarnessResult;
use crate::profile::{calls_in_span, LoadProfile, ProfileKind};

/// Aggregate outcome of one profile run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadResult {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    /// Failed calls that were rejected by an open circuit breaker
    pub circuit_open_rejected: u64,
    pub actual_rps: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub duration_seconds: f64,
    /// Per-call latency samples in milliseconds
    pub latencies: Vec<f64>,
    /// Scaled rate the run scheduled
    pub target_rps: u64,
    /// Largest amount by which a window's calls overran the window
    pub schedule_deviation_ms: f64,
}

impl LoadResult {
    /// Combine several runs: counts and durations add up, samples concatenate
    pub fn merge(parts: impl IntoIterator<Item = LoadResult>) -> LoadResult {
        let mut merged = LoadResult::default();
        for part in parts {
            if merged.target_rps == 0 {
                merged.target_rps = part.target_rps;
            }
            merged.total_requests += part.total_requests;
            merged.successful += part.successful;
            merged.failed += part.failed;
            merged.circuit_open_rejected += part.circuit_open_rejected;
            merged.duration_seconds += part.duration_seconds;
            merged.latencies.extend(part.latencies);
            merged.schedule_deviation_ms = merged.schedule_deviation_ms.max(part.schedule_deviation_ms);
        }
        merged.refresh_statistics();
        merged
    }

    /// Fraction of calls that failed
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed as f64 / self.total_requests as f64
        }
    }

    /// Whether the outcome counters agree with each other
    pub fn is_consistent(&self) -> bool {
        self.total_requests == self.successful + self.failed
            && self.circuit_open_rejected <= self.failed
    }

    /// Whether the achieved rate is within `tolerance` of the scheduled rate
    pub fn within_rps_tolerance(&self, tolerance: f64) -> bool {
        let target = self.target_rps as f64;
        target > 0.0 && (self.actual_rps - target).abs() <= target * tolerance
    }

    fn refresh_statistics(&mut self) {
        self.avg_latency_ms = if self.latencies.is_empty() {
            0.0
        } else {
            self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
        };
        self.p95_latency_ms = p95(&self.latencies);
        self.actual_rps = if self.duration_seconds > 0.0 {
            self.total_requests as f64 / self.duration_seconds
        } else {
            0.0
        };
    }
}

/// 95th percentile: the sorted sample at `floor(0.95 * n)`, clamped to the last one
pub fn p95(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let index = ((sorted.len() as f64 * 0.95).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Something that can drive a call at a profile's rate
#[async_trait]
pub trait LoadDriver: Send + Sync {
    async fn run_profile(&self, profile: &LoadProfile, call: CallFn) -> HarnessResult<LoadResult>;
}

/// Per-run outcome tracking
#[derive(Default)]
struct LoadTracker {
    successful: u64,
    failed: u64,
    circuit_open_rejected: u64,
    latencies: Vec<f64>,
    max_overrun: Duration,
}

impl LoadTracker {
    fn record_success(&mut self, latency: Duration) {
        self.successful += 1;
        self.latencies.push(latency.as_secs_f64() * 1000.0);
    }

    fn record_failure(&mut self, latency: Option<Duration>, circuit_open: bool) {
        self.failed += 1;
        if circuit_open {
            self.circuit_open_rejected += 1;
        }
        if let Some(latency) = latency {
            self.latencies.push(latency.as_secs_f64() * 1000.0);
        }
    }

    fn record_overrun(&mut self, overrun: Duration) {
        self.max_overrun = self.max_overrun.max(overrun);
    }

    fn into_result(self, target_rps: u64, elapsed: Duration) -> LoadResult {
        let mut result = LoadResult {
            total_requests: self.successful + self.failed,
            successful: self.successful,
            failed: self.failed,
            circuit_open_rejected: self.circuit_open_rejected,
            duration_seconds: elapsed.as_secs_f64(),
            latencies: self.latencies,
            target_rps,
            schedule_deviation_ms: self.max_overrun.as_secs_f64() * 1000.0,
            ..LoadResult::default()
        };
        result.refresh_statistics();
        result
    }
}

/// Window-based load generator
#[derive(Debug, Clone)]
pub struct LoadHarness {
    window: Duration,
}

impl LoadHarness {
    /// Harness with one-second windows
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
        }
    }

    pub fn from_config(config: &LoadConfig) -> Self {
        let millis = (config.window_seconds * 1000.0).round().max(1.0) as u64;
        Self::with_window(Duration::from_millis(millis))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drive `call` at the profile's scaled rate for its scaled duration.
    ///
    /// Only an invalid profile is an error; every call failure (including a
    /// panic inside the call) is counted in the result.
    pub async fn run_profile(&self, profile: &LoadProfile, call: CallFn) -> HarnessResult<LoadResult> {
        profile.validate()?;

        let rps = profile.scaled_rps();
        let duration = profile.scaled_duration();
        info!(
            kind = %profile.kind,
            rps,
            duration_ms = duration.as_millis() as u64,
            scale_factor = profile.scale_factor,
            "Starting load profile"
        );

        let result = match profile.kind {
            ProfileKind::Burst => {
                let mut cycles = Vec::with_capacity(profile.burst_cycles as usize);
                for cycle in 0..profile.burst_cycles {
                    debug!(cycle, "Starting burst cycle");
                    cycles.push(self.run_windows(rps, duration, &call).await);
                }
                LoadResult::merge(cycles)
            }
            _ => self.run_windows(rps, duration, &call).await,
        };

        info!(
            total = result.total_requests,
            failed = result.failed,
            actual_rps = result.actual_rps,
            p95_ms = result.p95_latency_ms,
            "Load profile finished"
        );
        Ok(result)
    }

    async fn run_windows(&self, rps: u64, duration: Duration, call: &CallFn) -> LoadResult {
        let mut tracker = LoadTracker::default();
        let started = Instant::now();
        let mut remaining = duration;

        while !remaining.is_zero() {
            let span = remaining.min(self.window);
            remaining -= span;

            let count = calls_in_span(rps, span.as_millis() as u64);
            let window_started = Instant::now();
            self.run_window(count, call, &mut tracker).await;

            let elapsed = window_started.elapsed();
            if elapsed < span {
                sleep(span - elapsed).await;
            } else if elapsed > span {
                let overrun = elapsed - span;
                debug!(overrun_ms = overrun.as_millis() as u64, "Window overran its schedule");
                tracker.record_overrun(overrun);
            }
        }

        tracker.into_result(rps, started.elapsed())
    }

    async fn run_window(&self, count: u64, call: &CallFn, tracker: &mut LoadTracker) {
        let mut tasks = JoinSet::new();
        for _ in 0..count {
            let call = Arc::clone(call);
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = AssertUnwindSafe(async move { call().await })
                    .catch_unwind()
                    .await;
                (started.elapsed(), outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((latency, Ok(Ok(())))) => tracker.record_success(latency),
                Ok((latency, Ok(Err(error)))) => {
                    tracker.record_failure(Some(latency), error.is_circuit_open())
                }
                Ok((latency, Err(_))) => {
                    warn!("Call panicked, counting it as failed");
                    tracker.record_failure(Some(latency), false);
                }
                Err(error) => {
                    warn!(error = %error, "Call task did not complete");
                    tracker.record_failure(None, false);
                }
            }
        }
    }
}

impl Default for LoadHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadDriver for LoadHarness {
    async fn run_profile(&self, profile: &LoadProfile, call: CallFn) -> HarnessResult<LoadResult> {
        LoadHarness::run_profile(self, profile, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use strain_resilience::{call_fn, CallError};

    fn ok_call() -> CallFn {
        call_fn(|| async { Ok(()) })
    }

    #[tokio::test(start_paused = true)]
    async fn test_baseline_rate_accuracy() {
        let profile = LoadProfile::new(ProfileKind::Baseline, 50, 5.0).unwrap();
        let result = LoadHarness::new().run_profile(&profile, ok_call()).await.unwrap();

        assert_eq!(result.total_requests, 250);
        assert_eq!(result.failed, 0);
        assert!(result.is_consistent());
        assert!(
            (35.0..=65.0).contains(&result.actual_rps),
            "actual_rps = {}",
            result.actual_rps
        );
        assert!(result.within_rps_tolerance(0.30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_outcomes_are_counted() {
        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);
        let call = call_fn(move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                match n % 4 {
                    0 => Err(CallError::CircuitOpen("primary".to_string())),
                    1 => Err(CallError::ErrorResponse("503".to_string())),
                    _ => Ok(()),
                }
            }
        });

        let profile = LoadProfile::new(ProfileKind::Peak, 20, 2.0).unwrap();
        let result = LoadHarness::new().run_profile(&profile, call).await.unwrap();

        assert_eq!(result.total_requests, 40);
        assert_eq!(result.successful, 20);
        assert_eq!(result.failed, 20);
        assert_eq!(result.circuit_open_rejected, 10);
        assert_eq!(result.latencies.len(), 40);
        assert!(result.is_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_call_counts_as_failure() {
        let exploding = true;
        let call = call_fn(move || async move {
            if exploding {
                panic!("dependency blew up");
            }
            Ok(())
        });

        let profile = LoadProfile::new(ProfileKind::Baseline, 5, 1.0).unwrap();
        let result = LoadHarness::new().run_profile(&profile, call).await.unwrap();

        assert_eq!(result.total_requests, 5);
        assert_eq!(result.failed, 5);
        assert_eq!(result.circuit_open_rejected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_trailing_window() {
        let profile = LoadProfile::new(ProfileKind::Baseline, 10, 2.5).unwrap();
        let result = LoadHarness::new().run_profile(&profile, ok_call()).await.unwrap();

        assert_eq!(result.total_requests, profile.expected_requests());
        assert_eq!(result.total_requests, 25);
        assert!((result.duration_seconds - 2.5).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_merges_cycles() {
        let profile = LoadProfile::burst().with_scale(0.1).unwrap();
        let result = LoadHarness::new().run_profile(&profile, ok_call()).await.unwrap();

        assert_eq!(result.total_requests, 150);
        assert_eq!(result.latencies.len(), 150);
        assert_eq!(result.target_rps, 30);
        assert!((result.duration_seconds - 5.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_record_schedule_deviation() {
        let call = call_fn(|| async {
            sleep(Duration::from_millis(1500)).await;
            Ok(())
        });

        let profile = LoadProfile::new(ProfileKind::Baseline, 2, 1.0).unwrap();
        let result = LoadHarness::new().run_profile(&profile, call).await.unwrap();

        assert_eq!(result.successful, 2);
        assert!((result.schedule_deviation_ms - 500.0).abs() < 1.0);
        assert!((result.p95_latency_ms - 1500.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_invalid_profile_is_rejected_before_running() {
        let mut profile = LoadProfile::baseline();
        profile.scale_factor = 0.001;

        let err = LoadHarness::new()
            .run_profile(&profile, ok_call())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidProfile(_)));
    }

    #[test]
    fn test_p95() {
        assert_eq!(p95(&[]), 0.0);
        assert_eq!(p95(&[7.0]), 7.0);

        let samples: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        assert_eq!(p95(&samples), 96.0);

        let samples: Vec<f64> = (1..=10).map(f64::from).collect();
        assert_eq!(p95(&samples), 10.0);
    }

    #[test]
    fn test_merge_and_error_rate() {
        let a = LoadResult {
            total_requests: 10,
            successful: 8,
            failed: 2,
            duration_seconds: 1.0,
            latencies: vec![1.0; 10],
            target_rps: 10,
            schedule_deviation_ms: 20.0,
            ..LoadResult::default()
        };
        let b = LoadResult {
            total_requests: 10,
            successful: 10,
            duration_seconds: 1.0,
            latencies: vec![3.0; 10],
            target_rps: 10,
            schedule_deviation_ms: 5.0,
            ..LoadResult::default()
        };

        let merged = LoadResult::merge([a, b]);
        assert_eq!(merged.total_requests, 20);
        assert_eq!(merged.failed, 2);
        assert_eq!(merged.actual_rps, 10.0);
        assert_eq!(merged.avg_latency_ms, 2.0);
        assert_eq!(merged.schedule_deviation_ms, 20.0);
        assert!((merged.error_rate() - 0.1).abs() < f64::EPSILON);
        assert!(merged.is_consistent());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let result: LoadResult = serde_json::from_str(r#"{"total_requests": 3, "successful": 3}"#).unwrap();
        assert_eq!(result.failed, 0);
        assert!(result.latencies.is_empty());
        assert!(result.is_consistent());
    }
}
