//! Circuit breaker, retry and dependency-call configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{require_positive, require_unit_interval, Validatable};

/// Resilience configuration for the dependency under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Per-attempt timeout applied by the dependency wrapper
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Whether write calls may be retried
    pub retry_writes: bool,
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failure ratio over the window at which the breaker opens
    pub failure_rate_threshold: f64,

    /// Samples required before the ratio is evaluated
    pub min_samples: u32,

    /// Successful half-open trial calls required to close
    pub success_threshold: u32,

    /// How long the breaker stays open before probing
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,

    /// Rolling window for failure counting
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per call including the first one
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub backoff: BackoffKind,

    /// Base for exponential backoff
    pub backoff_base: f64,

    pub jitter: bool,
}

/// Backoff shape between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            call_timeout: Duration::from_secs(1),
            retry_writes: false,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.25,
            min_samples: 10,
            success_threshold: 3,
            open_duration: Duration::from_secs(60),
            window: Duration::from_secs(60),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff: BackoffKind::Exponential,
            backoff_base: 2.0,
            jitter: true,
        }
    }
}

impl FromStr for BackoffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(BackoffKind::Fixed),
            "linear" => Ok(BackoffKind::Linear),
            "exponential" => Ok(BackoffKind::Exponential),
            _ => Err(format!("Invalid backoff: {}", s)),
        }
    }
}

impl Validatable for ResilienceConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;

        if self.call_timeout.is_zero() {
            return Err(self.invalid("call_timeout must be greater than 0"));
        }

        Ok(())
    }

    fn section(&self) -> &'static str {
        "resilience"
    }
}

impl Validatable for CircuitBreakerSettings {
    fn validate(&self) -> ConfigResult<()> {
        require_unit_interval(
            self.failure_rate_threshold,
            "failure_rate_threshold",
            self.section(),
        )?;
        require_positive(self.failure_rate_threshold, "failure_rate_threshold", self.section())?;
        require_positive(self.min_samples, "min_samples", self.section())?;
        require_positive(self.success_threshold, "success_threshold", self.section())?;

        if self.open_duration.is_zero() {
            return Err(self.invalid("open_duration must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(self.invalid("window must be greater than 0"));
        }

        Ok(())
    }

    fn section(&self) -> &'static str {
        "resilience.circuit_breaker"
    }
}

impl Validatable for RetrySettings {
    fn validate(&self) -> ConfigResult<()> {
        require_positive(self.max_attempts, "max_attempts", self.section())?;

        if self.initial_delay > self.max_delay {
            return Err(self.invalid("initial_delay cannot exceed max_delay"));
        }

        if self.backoff == BackoffKind::Exponential && self.backoff_base < 1.0 {
            return Err(self.invalid(format!(
                "backoff_base must be >= 1.0 for exponential backoff, got {}",
                self.backoff_base
            )));
        }

        Ok(())
    }

    fn section(&self) -> &'static str {
        "resilience.retry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resilience_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.circuit_breaker.failure_rate_threshold, 0.25);
        assert_eq!(config.circuit_breaker.min_samples, 10);
        assert_eq!(config.circuit_breaker.open_duration, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.retry_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_circuit_breaker_validation() {
        let mut settings = CircuitBreakerSettings {
            failure_rate_threshold: 0.0,
            ..CircuitBreakerSettings::default()
        };
        assert!(settings.validate().is_err());

        settings.failure_rate_threshold = 1.5;
        assert!(settings.validate().is_err());

        settings.failure_rate_threshold = 0.5;
        settings.min_samples = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_retry_validation() {
        let settings = RetrySettings {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            ..RetrySettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("resilience.retry"));
    }

    #[test]
    fn test_humantime_durations_in_yaml() {
        let yaml = r#"
circuit_breaker:
  min_samples: 20
  open_duration: 30s
retry:
  max_attempts: 2
  initial_delay: 10ms
call_timeout: 250ms
"#;
        let config: ResilienceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.circuit_breaker.min_samples, 20);
        assert_eq!(config.circuit_breaker.open_duration, Duration::from_secs(30));
        assert_eq!(config.circuit_breaker.failure_rate_threshold, 0.25);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(10));
        assert_eq!(config.call_timeout, Duration::from_millis(250));
    }
}
