//! Domain-driven configuration for the Strain harness
//!
//! Configuration is split by functional domain (load, resilience, injection,
//! analysis, logging), each with defaults, validation and environment
//! variable overrides under the `STRAIN_` prefix.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    analysis::{AlertThresholds, DivergenceConfig, ReportConfig},
    injection::InjectionSettings,
    load::LoadConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    resilience::{BackoffKind, CircuitBreakerSettings, ResilienceConfig, RetrySettings},
    HarnessConfig,
};
