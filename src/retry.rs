//! Backoff policies and a clock abstraction for retries.
//!
//! Everything that waits between attempts (the address resolver, provider
//! HTTP retries, watch reconnection) goes through a [`BackoffPolicy`] and a
//! [`Clock`], so tests can drive retries without real time passing.
//!
//! # Example
//!
//! ```ignore
//! use nodeptr::retry::{retry_with_backoff, BackoffPolicy, TokioClock};
//!
//! let result = retry_with_backoff(
//!     &BackoffPolicy::exponential(3),
//!     &TokioClock,
//!     "list_instances",
//!     || async { client.list_instances().await },
//! ).await?;
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, warn};

/// How many times to try an operation and how long to wait in between.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (always at least one attempt is made)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt (1.0 = fixed delay)
    pub backoff_multiplier: f64,
    /// Jitter fraction in [0, 1): each delay is scaled by a random factor in
    /// `1 - jitter ..= 1 + jitter`
    pub jitter: f64,
}

impl BackoffPolicy {
    /// Fixed delay between a bounded number of attempts, no jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Exponential backoff starting at 500ms, capped at 10s, with jitter
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Set the jitter fraction, clamped to `[0, MAX_JITTER]`
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = clamp_jitter(jitter);
        self
    }

    /// Worst-case total time spent waiting if every attempt fails (jitter ignored)
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.base_delay(attempt))
            .sum()
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = clamp_jitter(self.jitter);
        if jitter <= 0.0 {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Largest jitter fraction applied; keeps every jittered delay positive
pub const MAX_JITTER: f64 = 0.99;

fn clamp_jitter(jitter: f64) -> f64 {
    if jitter.is_nan() {
        return 0.0;
    }
    jitter.clamp(0.0, MAX_JITTER)
}

/// Source of time for retry loops.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Execute an async operation, retrying failures according to `policy`.
///
/// `should_retry` decides whether a given error is worth another attempt;
/// errors it rejects are returned immediately. Returns the last error once
/// `max_attempts` is exhausted.
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &BackoffPolicy,
    clock: &dyn Clock,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                clock.sleep(delay).await;
            }
        }
    }
}

/// Execute an async operation, retrying every failure according to `policy`.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    clock: &dyn Clock,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(policy, clock, operation_name, |_| true, operation).await
}
