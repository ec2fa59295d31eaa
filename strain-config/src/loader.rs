//! Configuration loading and environment variable handling

use crate::domains::HarnessConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "STRAIN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML or JSON file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<HarnessConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut config: HarnessConfig = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<HarnessConfig> {
        let mut config = HarnessConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<HarnessConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut HarnessConfig) -> ConfigResult<()> {
        self.apply_load_overrides(&mut config.load)?;
        self.apply_resilience_overrides(&mut config.resilience)?;
        self.apply_injection_overrides(&mut config.injection)?;
        self.apply_analysis_overrides(config)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_load_overrides(
        &self,
        config: &mut crate::domains::load::LoadConfig,
    ) -> ConfigResult<()> {
        if let Some(value) = self.parse_env_var("WINDOW_SECONDS")? {
            config.window_seconds = value;
        }
        if let Some(value) = self.parse_env_var("RPS_TOLERANCE")? {
            config.rps_tolerance = value;
        }
        Ok(())
    }

    fn apply_resilience_overrides(
        &self,
        config: &mut crate::domains::resilience::ResilienceConfig,
    ) -> ConfigResult<()> {
        if let Some(value) = self.parse_env_var("CB_FAILURE_RATE_THRESHOLD")? {
            config.circuit_breaker.failure_rate_threshold = value;
        }
        if let Some(value) = self.parse_env_var("CB_MIN_SAMPLES")? {
            config.circuit_breaker.min_samples = value;
        }
        if let Some(seconds) = self.parse_env_var::<u64>("CB_OPEN_SECONDS")? {
            config.circuit_breaker.open_duration = std::time::Duration::from_secs(seconds);
        }
        if let Some(value) = self.parse_env_var("RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = value;
        }
        if let Some(value) = self.parse_env_var("RETRY_WRITES")? {
            config.retry_writes = value;
        }
        if let Some(millis) = self.parse_env_var::<u64>("CALL_TIMEOUT_MS")? {
            config.call_timeout = std::time::Duration::from_millis(millis);
        }
        Ok(())
    }

    fn apply_injection_overrides(
        &self,
        config: &mut crate::domains::injection::InjectionSettings,
    ) -> ConfigResult<()> {
        if let Some(value) = self.parse_env_var("SEED")? {
            config.default_seed = value;
        }
        if let Ok(dependency) = self.get_env_var("DEPENDENCY") {
            config.default_dependency = dependency;
        }
        Ok(())
    }

    fn apply_analysis_overrides(&self, config: &mut HarnessConfig) -> ConfigResult<()> {
        if let Some(value) = self.parse_env_var("MAX_CLOCK_SKEW_SECONDS")? {
            config.divergence.max_clock_skew_seconds = value;
        }
        if let Some(value) = self.parse_env_var("FLAKY_THRESHOLD_MS")? {
            config.report.flaky_threshold_ms = value;
        }
        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Some(level) = self.parse_env_var("LOG_LEVEL")? {
            config.level = level;
        }
        if let Some(format) = self.parse_env_var("LOG_FORMAT")? {
            config.format = format;
        }
        Ok(())
    }

    /// Parse a prefixed environment variable if it is set
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Ok(raw) = self.get_env_var(name) else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|e: T::Err| ConfigError::Override {
            variable: format!("{}_{}", self.prefix, name),
            reason: e.to_string(),
            value: raw.clone(),
        })
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
