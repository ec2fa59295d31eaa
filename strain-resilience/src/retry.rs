//! Bounded retries with backoff

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Shape of the pause before attempt `n + 1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    /// `initial_delay * n`
    Linear,
    /// `initial_delay * base^(n - 1)`
    Exponential { base: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per call, the first one included
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Cap applied before jitter
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub backoff: BackoffStrategy,

    /// Spread each pause uniformly over 80%..120% of its nominal length
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff: BackoffStrategy::Exponential { base: 2.0 },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn max_retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Pause after failed attempt `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = match &self.backoff {
            BackoffStrategy::Fixed => 1.0,
            BackoffStrategy::Linear => f64::from(attempt),
            BackoffStrategy::Exponential { base } => base.powi(attempt as i32 - 1),
        };
        let scale = |delay: Duration, by: f64| {
            Duration::try_from_secs_f64(delay.as_secs_f64() * by).unwrap_or(self.max_delay)
        };
        let nominal = scale(self.initial_delay, factor).min(self.max_delay);

        if self.jitter {
            scale(nominal, rand::thread_rng().gen_range(0.8..1.2))
        } else {
            nominal
        }
    }
}

/// Errors that know whether another attempt could help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("not retried: {0}")]
    Fatal(E),
}

impl<E> RetryError<E> {
    /// The error of the final attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Fatal(last) => last,
        }
    }
}

/// Drives one logical call through the attempts its policy allows
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op(attempt)` until it succeeds, fails permanently or the policy
    /// runs out. `attempt` starts at 1.
    pub async fn run<F, Fut, T, E>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let limit = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("attempt {attempt} succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(RetryError::Fatal(error));
            }
            if attempt >= limit {
                log::debug!("giving up after {attempt} attempt(s): {error}");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let pause = self.policy.delay_for_attempt(attempt);
            log::debug!("attempt {attempt}/{limit} failed ({error}), next in {pause:?}");
            tokio::time::sleep(pause).await;
            attempt += 1;
        }
    }
}
