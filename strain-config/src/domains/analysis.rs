//! Divergence analysis and report configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{require_non_negative, require_positive, require_unit_interval, Validatable};

/// Multi-instance divergence analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Assumed maximum clock drift between instances, subtracted before comparing
    pub max_clock_skew_seconds: f64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            max_clock_skew_seconds: 0.05,
        }
    }
}

impl Validatable for DivergenceConfig {
    fn validate(&self) -> ConfigResult<()> {
        require_non_negative(
            self.max_clock_skew_seconds,
            "max_clock_skew_seconds",
            self.section(),
        )
    }

    fn section(&self) -> &'static str {
        "divergence"
    }
}

/// Stress report thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Scheduling deviation (ms) above which a flaky-test correlation is attached
    pub flaky_threshold_ms: f64,

    /// Retry amplification above which retry tuning is recommended
    pub retry_amplification_limit: f64,

    /// Injection rate from which an error-rate alert is expected to fire
    pub alert_min_injection_rate: f64,

    #[serde(default)]
    pub alerts: AlertThresholds,
}

/// Thresholds of the built-in alert rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub error_rate: f64,
    pub p95_latency_ms: f64,
    pub retry_amplification: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            flaky_threshold_ms: 100.0,
            retry_amplification_limit: 1.0,
            alert_min_injection_rate: 0.1,
            alerts: AlertThresholds::default(),
        }
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.05,
            p95_latency_ms: 1000.0,
            retry_amplification: 1.0,
        }
    }
}

impl Validatable for ReportConfig {
    fn validate(&self) -> ConfigResult<()> {
        require_positive(self.flaky_threshold_ms, "flaky_threshold_ms", self.section())?;
        require_non_negative(
            self.retry_amplification_limit,
            "retry_amplification_limit",
            self.section(),
        )?;
        require_unit_interval(
            self.alert_min_injection_rate,
            "alert_min_injection_rate",
            self.section(),
        )?;
        require_unit_interval(self.alerts.error_rate, "alerts.error_rate", self.section())?;
        require_positive(self.alerts.p95_latency_ms, "alerts.p95_latency_ms", self.section())?;
        require_non_negative(
            self.alerts.retry_amplification,
            "alerts.retry_amplification",
            self.section(),
        )?;
        Ok(())
    }

    fn section(&self) -> &'static str {
        "report"
    }
}
