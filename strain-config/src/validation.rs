//! Range checks shared by the configuration sections

use crate::error::{ConfigError, ConfigResult};
use std::fmt::Display;

/// A configuration section that can reject its own values
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    /// Dotted section path, e.g. `resilience.retry`
    fn section(&self) -> &'static str;

    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            section: self.section(),
            reason: reason.into(),
        }
    }
}

fn reject(section: &'static str, field: &str, wanted: &str, got: impl Display) -> ConfigError {
    ConfigError::Invalid {
        section,
        reason: format!("{field} must be {wanted} (got {got})"),
    }
}

pub fn require_non_empty(value: &str, field: &str, section: &'static str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(reject(section, field, "non-empty", "\"\""));
    }
    Ok(())
}

/// Works for counts and for float quantities alike
pub fn require_positive<T>(value: T, field: &str, section: &'static str) -> ConfigResult<()>
where
    T: PartialOrd + Default + Display,
{
    match value.partial_cmp(&T::default()) {
        Some(std::cmp::Ordering::Greater) => Ok(()),
        _ => Err(reject(section, field, "> 0", value)),
    }
}

pub fn require_unit_interval(value: f64, field: &str, section: &'static str) -> ConfigResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(reject(section, field, "within [0, 1]", value))
    }
}

pub fn require_non_negative(value: f64, field: &str, section: &'static str) -> ConfigResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(reject(section, field, "finite and >= 0", value))
    }
}
