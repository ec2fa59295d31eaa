//! Load profiles: target rate, duration and scaling

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HarnessError, HarnessResult};

/// Smallest accepted scale factor
pub const MIN_SCALE_FACTOR: f64 = 0.01;

/// Highest target rate a profile accepts; each window spawns this many tasks
pub const MAX_TARGET_RPS: u64 = 100_000;

/// Shape of a load profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    #[default]
    Baseline,
    Peak,
    Stress,
    /// Repeated short windows at the target rate
    Burst,
}

impl ProfileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileKind::Baseline => "baseline",
            ProfileKind::Peak => "peak",
            ProfileKind::Stress => "stress",
            ProfileKind::Burst => "burst",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" => Ok(ProfileKind::Baseline),
            "peak" => Ok(ProfileKind::Peak),
            "stress" => Ok(ProfileKind::Stress),
            "burst" => Ok(ProfileKind::Burst),
            _ => Err(HarnessError::InvalidProfile(format!(
                "unknown profile kind '{}'",
                s
            ))),
        }
    }
}

/// Target traffic for one scenario.
///
/// `scale_factor` shrinks both the rate and the duration so that the same
/// profile can run quickly in CI. For [`ProfileKind::Burst`] the duration is
/// the length of a single burst window and is not scaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub kind: ProfileKind,
    pub target_rps: u64,
    pub duration_seconds: f64,
    #[serde(default)]
    pub burst_cycles: u32,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

fn default_scale_factor() -> f64 {
    1.0
}

impl LoadProfile {
    /// Build and validate a profile
    pub fn new(kind: ProfileKind, target_rps: u64, duration_seconds: f64) -> HarnessResult<Self> {
        let burst_cycles = if kind == ProfileKind::Burst { 1 } else { 0 };
        let profile = Self {
            kind,
            target_rps,
            duration_seconds,
            burst_cycles,
            scale_factor: 1.0,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// 50 rps for 60 s
    pub fn baseline() -> Self {
        Self::steady(ProfileKind::Baseline, 50, 60.0)
    }

    /// 200 rps for 60 s
    pub fn peak() -> Self {
        Self::steady(ProfileKind::Peak, 200, 60.0)
    }

    /// 500 rps for 30 s
    pub fn stress() -> Self {
        Self::steady(ProfileKind::Stress, 500, 30.0)
    }

    /// 5 one-second windows at 300 rps
    pub fn burst() -> Self {
        Self {
            kind: ProfileKind::Burst,
            target_rps: 300,
            duration_seconds: 1.0,
            burst_cycles: 5,
            scale_factor: 1.0,
        }
    }

    /// Preset profile for a kind
    pub fn preset(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::Baseline => Self::baseline(),
            ProfileKind::Peak => Self::peak(),
            ProfileKind::Stress => Self::stress(),
            ProfileKind::Burst => Self::burst(),
        }
    }

    fn steady(kind: ProfileKind, target_rps: u64, duration_seconds: f64) -> Self {
        Self {
            kind,
            target_rps,
            duration_seconds,
            burst_cycles: 0,
            scale_factor: 1.0,
        }
    }

    /// Copy of this profile with a different scale factor
    pub fn with_scale(&self, scale_factor: f64) -> HarnessResult<Self> {
        let profile = Self {
            scale_factor,
            ..self.clone()
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Copy of this profile with a different number of burst cycles
    pub fn with_burst_cycles(&self, burst_cycles: u32) -> HarnessResult<Self> {
        let profile = Self {
            burst_cycles,
            ..self.clone()
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if !self.scale_factor.is_finite()
            || self.scale_factor < MIN_SCALE_FACTOR
            || self.scale_factor > 1.0
        {
            return Err(HarnessError::InvalidProfile(format!(
                "scale_factor must be within [{}, 1.0], got {}",
                MIN_SCALE_FACTOR, self.scale_factor
            )));
        }

        if self.target_rps == 0 || self.target_rps > MAX_TARGET_RPS {
            return Err(HarnessError::InvalidProfile(format!(
                "target_rps must be within [1, {}], got {}",
                MAX_TARGET_RPS, self.target_rps
            )));
        }

        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(HarnessError::InvalidProfile(format!(
                "duration_seconds must be a positive number, got {}",
                self.duration_seconds
            )));
        }

        if self.kind == ProfileKind::Burst && self.burst_cycles == 0 {
            return Err(HarnessError::InvalidProfile(
                "burst profiles need at least one cycle".to_string(),
            ));
        }

        if self.scaled_duration().is_zero() {
            return Err(HarnessError::InvalidProfile(format!(
                "scaled duration of {}s x {} rounds to zero",
                self.duration_seconds, self.scale_factor
            )));
        }

        Ok(())
    }

    /// Calls scheduled per second after scaling, never below 1
    pub fn scaled_rps(&self) -> u64 {
        ((self.target_rps as f64 * self.scale_factor).floor() as u64).max(1)
    }

    /// Run length after scaling, rounded to the millisecond.
    ///
    /// Burst windows keep their length.
    pub fn scaled_duration(&self) -> Duration {
        let seconds = match self.kind {
            ProfileKind::Burst => self.duration_seconds,
            _ => self.duration_seconds * self.scale_factor,
        };
        Duration::from_millis((seconds * 1000.0).round() as u64)
    }

    /// Number of calls the profile schedules with one-second windows
    pub fn expected_requests(&self) -> u64 {
        let rps = self.scaled_rps();
        let millis = self.scaled_duration().as_millis() as u64;

        let mut requests = rps.saturating_mul(millis / 1000);
        if millis % 1000 > 0 {
            requests = requests.saturating_add(calls_in_span(rps, millis % 1000));
        }

        match self.kind {
            ProfileKind::Burst => requests.saturating_mul(u64::from(self.burst_cycles)),
            _ => requests,
        }
    }
}

/// Calls scheduled in a window of `span_millis` at `rps`, never below 1
pub(crate) fn calls_in_span(rps: u64, span_millis: u64) -> u64 {
    (rps.saturating_mul(span_millis) / 1000).max(1)
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self::baseline()
    }
}
