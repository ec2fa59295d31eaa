//! Fault injection defaults
//!
//! Injected stalls and slow responses are sized from
//! `resilience.call_timeout`, so there is no separate injection timeout.

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{require_non_empty, Validatable};

/// Defaults applied when a scenario injects failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionSettings {
    /// Seed used when a scenario does not specify one
    pub default_seed: u64,

    /// Dependency targeted when a scenario does not name one
    pub default_dependency: String,
}

impl Default for InjectionSettings {
    fn default() -> Self {
        Self {
            default_seed: 42,
            default_dependency: "primary".to_string(),
        }
    }
}

impl Validatable for InjectionSettings {
    fn validate(&self) -> ConfigResult<()> {
        require_non_empty(
            &self.default_dependency,
            "default_dependency",
            self.section(),
        )?;
        Ok(())
    }

    fn section(&self) -> &'static str {
        "injection"
    }
}
