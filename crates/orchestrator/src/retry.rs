//! Retry logic with exponential backoff for transient apply failures.
//!
//! Attempts report their outcome as an explicit [`Attempt`] value instead of
//! relying on the error type alone, so the caller decides per module which
//! failures are worth another try.

use crate::cancel::CancelToken;
use crate::error::ExecutionError;
use std::time::Duration;

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor: 2.0,
            max_delay,
        }
    }

    /// Calculate the delay after a given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The operation succeeded
    Success(T),
    /// The operation failed but may succeed if retried
    TransientFailure(ExecutionError),
    /// The operation failed and retrying cannot help
    FatalFailure(ExecutionError),
}

/// What [`with_retry`] observed over all attempts.
#[derive(Debug)]
pub struct RetryReport<T> {
    /// Final value or the last error
    pub outcome: Result<T, ExecutionError>,
    /// Number of attempts actually made
    pub attempts: u32,
    /// Errors from every failed attempt, in order
    pub history: Vec<ExecutionError>,
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an attempt failed and another one is scheduled.
    ///
    /// # Arguments
    /// * `attempt` - The attempt that failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&mut self, attempt: u32, max_attempts: u32, error: &ExecutionError, delay: Duration);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&mut self, _: u32, _: u32, _: &ExecutionError, _: Duration) {}
}

/// Execute an operation with retry logic.
///
/// The operation receives the 1-indexed attempt number. Transient failures
/// are retried after an exponential backoff until the attempt budget runs
/// out; fatal failures stop immediately. Backoff sleeps wake early when
/// `cancel` fires, in which case the outcome is an interrupted error.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    callback: &mut dyn RetryCallback,
    mut operation: F,
) -> RetryReport<T>
where
    F: FnMut(u32) -> Attempt<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut history = Vec::new();

    for attempt in 0..max_attempts {
        let number = attempt + 1;
        let error = match operation(number) {
            Attempt::Success(value) => {
                return RetryReport {
                    outcome: Ok(value),
                    attempts: number,
                    history,
                };
            }
            Attempt::FatalFailure(e) => {
                history.push(e.clone());
                return RetryReport {
                    outcome: Err(e),
                    attempts: number,
                    history,
                };
            }
            Attempt::TransientFailure(e) => e,
        };

        history.push(error.clone());

        if number >= max_attempts {
            return RetryReport {
                outcome: Err(error),
                attempts: number,
                history,
            };
        }

        let delay = policy.delay_for_attempt(attempt);
        callback.on_retry(number, max_attempts, &error, delay);

        if !cancel.sleep(delay) {
            log::info!("Retry backoff interrupted after attempt {number}");
            return RetryReport {
                outcome: Err(ExecutionError::interrupted()),
                attempts: number,
                history,
            };
        }
    }

    unreachable!("loop always returns on the last attempt")
}
