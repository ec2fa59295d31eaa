//! Process-wide fault injector
//!
//! There is exactly one injector per process in practice, but it is passed
//! around as an explicit handle. Scenarios take an [`InjectorLease`] before
//! configuring injection points; leases are exclusive, so scenarios serialize
//! through the injector, and dropping a lease disables every point and resets
//! the injector no matter how the scenario ended.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

/// Synthetic failure injected into a dependency call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stall past the call timeout
    Timeout,
    /// Fail immediately with an error response
    ErrorResponse,
    /// Fail immediately with a connection error
    ConnectionError,
    /// Respond slowly but successfully
    DoubleLatency,
}

impl FailureMode {
    pub const ALL: [FailureMode; 4] = [
        FailureMode::Timeout,
        FailureMode::ErrorResponse,
        FailureMode::ConnectionError,
        FailureMode::DoubleLatency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FailureMode::Timeout => "timeout",
            FailureMode::ErrorResponse => "error_response",
            FailureMode::ConnectionError => "connection_error",
            FailureMode::DoubleLatency => "double_latency",
        }
    }
}

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureMode {
    type Err = InjectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "timeout" => Ok(FailureMode::Timeout),
            "error_response" | "error" => Ok(FailureMode::ErrorResponse),
            "connection_error" | "connection" => Ok(FailureMode::ConnectionError),
            "double_latency" | "latency" => Ok(FailureMode::DoubleLatency),
            _ => Err(InjectorError::UnknownFailureMode(s.to_string())),
        }
    }
}

/// Injector errors
#[derive(Debug, Error, PartialEq)]
pub enum InjectorError {
    #[error("Injection rate for '{point}' must be within [0, 1], got {rate}")]
    InvalidRate { point: String, rate: f64 },

    #[error("Unknown failure mode: {0}")]
    UnknownFailureMode(String),
}

/// A named place in the call path where failures may be injected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionPoint {
    pub name: String,
    pub rate: f64,
    pub mode: FailureMode,
    pub enabled: bool,
}

#[derive(Default)]
struct InjectorInner {
    points: Mutex<HashMap<String, InjectionPoint>>,
    lease: Arc<tokio::sync::Mutex<()>>,
}

/// Handle to the process-wide fault injector
#[derive(Clone, Default)]
pub struct FaultInjector {
    inner: Arc<InjectorInner>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive use of the injector until the returned lease is dropped
    pub async fn acquire(&self) -> InjectorLease {
        let guard = Arc::clone(&self.inner.lease).lock_owned().await;
        InjectorLease {
            injector: self.clone(),
            _guard: guard,
        }
    }

    /// Configure and enable an injection point
    pub fn configure(&self, point: &str, rate: f64, mode: FailureMode) -> Result<(), InjectorError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(InjectorError::InvalidRate {
                point: point.to_string(),
                rate,
            });
        }

        self.inner.points.lock().insert(
            point.to_string(),
            InjectionPoint {
                name: point.to_string(),
                rate,
                mode,
                enabled: true,
            },
        );
        log::debug!("Injection point '{}' enabled: {} at rate {}", point, mode, rate);
        Ok(())
    }

    pub fn disable(&self, point: &str) {
        if let Some(entry) = self.inner.points.lock().get_mut(point) {
            entry.enabled = false;
        }
    }

    pub fn disable_all(&self) {
        for entry in self.inner.points.lock().values_mut() {
            entry.enabled = false;
        }
    }

    /// Forget every configured point
    pub fn reset(&self) {
        self.inner.points.lock().clear();
    }

    pub fn is_enabled(&self, point: &str) -> bool {
        self.inner
            .points
            .lock()
            .get(point)
            .is_some_and(|entry| entry.enabled)
    }

    pub fn point(&self, point: &str) -> Option<InjectionPoint> {
        self.inner.points.lock().get(point).cloned()
    }

    /// Names of enabled points, sorted
    pub fn enabled_points(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .points
            .lock()
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.name.clone())
            .collect();
        names.sort();
        names
    }

    fn release(&self) {
        let released = catch_unwind(AssertUnwindSafe(|| {
            self.disable_all();
            self.reset();
        }));
        if released.is_err() {
            log::error!("Fault injector cleanup failed; injector state may be stale");
        }
    }
}

/// Exclusive, scoped use of the fault injector
pub struct InjectorLease {
    injector: FaultInjector,
    _guard: OwnedMutexGuard<()>,
}

impl InjectorLease {
    pub fn injector(&self) -> &FaultInjector {
        &self.injector
    }

    pub fn configure(&self, point: &str, rate: f64, mode: FailureMode) -> Result<(), InjectorError> {
        self.injector.configure(point, rate, mode)
    }
}

impl Drop for InjectorLease {
    fn drop(&mut self) {
        self.injector.release();
        log::debug!("Fault injector lease released");
    }
}
