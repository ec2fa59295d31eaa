//! Resilience collaborators for Strain
//!
//! This crate provides the pieces a stress scenario drives: circuit breakers
//! and their per-dependency registry, retry policies, the dependency call
//! wrapper, the process-wide fault injector and the per-dependency metrics
//! collector.

pub mod circuit_breaker;
pub mod dependency;
pub mod injector;
pub mod metrics;
pub mod registry;
pub mod retry;

// Re-export commonly used types
pub use circuit_breaker::{
    BreakerCounters, CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition,
};
pub use dependency::{call_fn, CallError, CallFn, CallFuture, DependencyCaller, DependencyPolicy};
pub use injector::{FailureMode, FaultInjector, InjectionPoint, InjectorError, InjectorLease};
pub use metrics::{CallOutcome, DependencyCounters, MetricsRegistry};
pub use registry::{CircuitBreakerRegistry, TransitionRecord};
pub use retry::{BackoffStrategy, RetryError, RetryExecutor, RetryPolicy, Retryable};
