use std::future::Future;
use std::thread;
use std::time::Duration;

use crit_core::{CallError, CritError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Randomized exponential backoff around calls to external services.
///
/// After the n-th failed attempt the wait is drawn uniformly from
/// `[min_wait, clamp(2^(n-1), min_wait, max_wait)]` units. Only [`CallError::Transient`]
/// failures (timeouts included) are retried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: f64,
    pub max_wait: f64,
    pub unit_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            min_wait: 1.0,
            max_wait: 60.0,
            unit_ms: 1000,
            call_timeout_secs: 120,
        }
    }
}

/// Last error of a call that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub error: CallError,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(CritError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.min_wait >= 0.0 && self.max_wait >= self.min_wait && self.max_wait.is_finite()) {
            return Err(CritError::Config(format!(
                "retry waits must satisfy 0 <= min_wait <= max_wait (got {} and {})",
                self.min_wait, self.max_wait
            )));
        }
        if self.call_timeout_secs == 0 {
            return Err(CritError::Config(
                "retry.call_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn unit(&self) -> Duration {
        Duration::from_millis(self.unit_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Wait before the next attempt, given how many attempts have failed so far.
    pub fn backoff<R: Rng>(&self, failed_attempts: u32, rng: &mut R) -> Duration {
        // unvalidated policies degrade to a zero or saturated wait
        let min = self.min_wait.max(0.0);
        let max = self.max_wait.max(min);
        let exponent = failed_attempts.saturating_sub(1).min(62) as i32;
        let upper = 2f64.powi(exponent).clamp(min, max);
        let units = if upper > min {
            rng.gen_range(min..=upper)
        } else {
            min
        };
        Duration::try_from_secs_f64(self.unit().as_secs_f64() * units).unwrap_or(Duration::MAX)
    }

    /// Runs `call` until it succeeds, fails permanently or runs out of attempts. Each attempt
    /// is bounded by [`RetryPolicy::call_timeout`]. Returns the value and the attempts used.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        mut call: F,
    ) -> std::result::Result<(T, u32), RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, CallError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.call_timeout(), call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CallError::Transient(format!(
                    "timed out after {}s",
                    self.call_timeout_secs
                ))),
            };
            let error = match outcome {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => error,
            };
            if !error.is_retryable() || attempt >= self.max_attempts {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }
            let wait = self.backoff(attempt, &mut rand::thread_rng());
            warn!(
                call = label,
                attempt,
                max_attempts = self.max_attempts,
                wait_ms = wait.as_millis() as u64,
                %error,
                "retrying after transient failure"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Blocking counterpart of [`RetryPolicy::run`] for calls made outside the async runtime.
    /// No per-call timeout is applied; the client's own timeout bounds each attempt.
    pub fn run_blocking<T, F>(
        &self,
        label: &str,
        mut call: F,
    ) -> std::result::Result<(T, u32), RetryFailure>
    where
        F: FnMut() -> std::result::Result<T, CallError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let error = match call() {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => error,
            };
            if !error.is_retryable() || attempt >= self.max_attempts {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }
            let wait = self.backoff(attempt, &mut rand::thread_rng());
            warn!(
                call = label,
                attempt,
                max_attempts = self.max_attempts,
                wait_ms = wait.as_millis() as u64,
                %error,
                "retrying after transient failure"
            );
            thread::sleep(wait);
        }
    }
}
