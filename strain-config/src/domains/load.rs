//! Load generation configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{require_positive, Validatable};

/// Load generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Length of one scheduling window in seconds
    pub window_seconds: f64,

    /// Accepted relative deviation of achieved RPS from the target
    pub rps_tolerance: f64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            window_seconds: 1.0,
            rps_tolerance: 0.30,
        }
    }
}

impl Validatable for LoadConfig {
    fn validate(&self) -> ConfigResult<()> {
        require_positive(self.window_seconds, "window_seconds", self.section())?;

        if !(self.rps_tolerance > 0.0 && self.rps_tolerance < 1.0) {
            return Err(self.invalid(format!(
                "rps_tolerance must be within (0, 1), got {}",
                self.rps_tolerance
            )));
        }

        Ok(())
    }

    fn section(&self) -> &'static str {
        "load"
    }
}
