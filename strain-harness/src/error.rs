//! Harness error types

use strain_resilience::InjectorError;
use thiserror::Error;

/// Errors raised by the harness.
///
/// Per-call failures never surface here: the load harness counts them.
/// Only configuration problems and driver failures do.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The load profile cannot be run
    #[error("Invalid load profile: {0}")]
    InvalidProfile(String),

    /// The injection configuration is unusable
    #[error("Invalid injection config: {0}")]
    InvalidInjection(String),

    /// The scenario request itself is unusable
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    /// The process-wide fault injector refused a configuration
    #[error("Fault injector error: {0}")]
    Injector(#[from] InjectorError),

    /// A scenario could not complete
    #[error("Scenario '{scenario}' failed: {message}")]
    Scenario { scenario: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] strain_config::ConfigError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the harness
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    pub fn scenario(scenario: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::Scenario {
            scenario: scenario.into(),
            message: message.into(),
        }
    }

    /// Whether the error was caused by configuration rather than by a run
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarnessError::InvalidProfile(_)
                | HarnessError::InvalidInjection(_)
                | HarnessError::InvalidScenario(_)
                | HarnessError::Injector(_)
                | HarnessError::Config(_)
        )
    }
}
