//! Domain-specific configuration modules

pub mod analysis;
pub mod injection;
pub mod load;
pub mod logging;
pub mod resilience;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main harness configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HarnessConfig {
    /// Load generation configuration
    #[serde(default)]
    pub load: load::LoadConfig,

    /// Circuit breaker, retry and timeout configuration
    #[serde(default)]
    pub resilience: resilience::ResilienceConfig,

    /// Fault injection defaults
    #[serde(default)]
    pub injection: injection::InjectionSettings,

    /// Multi-instance divergence analysis
    #[serde(default)]
    pub divergence: analysis::DivergenceConfig,

    /// Report thresholds
    #[serde(default)]
    pub report: analysis::ReportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl HarnessConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.load.validate()?;
        self.resilience.validate()?;
        self.injection.validate()?;
        self.divergence.validate()?;
        self.report.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = HarnessConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
