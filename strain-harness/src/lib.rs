//! Load characterization and failure-injection harness
//!
//! Scenarios drive a load profile through the resilience layer of one
//! dependency, optionally injecting seeded failures, and capture what the
//! metrics and circuit breakers did. Results aggregate into a stress report
//! with tuning recommendations for breaker timing, retry limits and alert
//! thresholds.

pub mod alert;
pub mod capture;
pub mod diagnostic;
pub mod divergence;
pub mod error;
pub mod injection;
pub mod load;
pub mod profile;
pub mod report;
pub mod scenario;
pub mod settings;

// Re-export commonly used types
pub use alert::{AlertEvaluator, AlertMetric, AlertRule, MetricValues, ThresholdAlertEvaluator};
pub use capture::{compute_delta, retry_amplification, MetricDelta, MetricSnapshot, MetricsCapture};
pub use diagnostic::{
    check_breaker_state, check_count_invariant, check_invariants, check_max_error_rate,
    check_rps_tolerance, check_write_path, CheckResult, FailDiagnostic,
};
pub use divergence::{compute_divergence, first_open, DivergenceAnalyzer, DivergenceResult};
pub use error::{HarnessError, HarnessResult};
pub use injection::{wrap, FaultInjectionAdapter, InjectionConfig, InjectionStats};
pub use load::{p95, LoadDriver, LoadHarness, LoadResult};
pub use profile::{LoadProfile, ProfileKind, MAX_TARGET_RPS, MIN_SCALE_FACTOR};
pub use report::{
    generate, FlakyCorrelationSegment, MetricsRow, ReportGenerator, StressReport,
    TuningRecommendation,
};
pub use scenario::{
    InstanceFailure, MultiInstanceRun, ScenarioResult, ScenarioRunner, SimulatedDependency,
};
