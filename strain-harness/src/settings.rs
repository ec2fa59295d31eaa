//! Conversions from configuration domains to resilience primitives

use strain_config::{BackoffKind, CircuitBreakerSettings, ResilienceConfig, RetrySettings};
use strain_resilience::{BackoffStrategy, CircuitBreakerConfig, DependencyPolicy, RetryPolicy};

pub fn breaker_config(settings: &CircuitBreakerSettings) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_rate_threshold: settings.failure_rate_threshold,
        min_samples: settings.min_samples,
        success_threshold: settings.success_threshold,
        open_duration: settings.open_duration,
        window: settings.window,
    }
}

pub fn retry_policy(settings: &RetrySettings) -> RetryPolicy {
    let backoff = match settings.backoff {
        BackoffKind::Fixed => BackoffStrategy::Fixed,
        BackoffKind::Linear => BackoffStrategy::Linear,
        BackoffKind::Exponential => BackoffStrategy::Exponential {
            base: settings.backoff_base,
        },
    };

    RetryPolicy {
        max_attempts: settings.max_attempts,
        initial_delay: settings.initial_delay,
        max_delay: settings.max_delay,
        backoff,
        jitter: settings.jitter,
    }
}

pub fn dependency_policy(config: &ResilienceConfig) -> DependencyPolicy {
    DependencyPolicy {
        retry: retry_policy(&config.retry),
        timeout: config.call_timeout,
        retry_writes: config.retry_writes,
    }
}
