//! Bounded exponential-backoff retry for recognition requests.

use std::time::Duration;

use log::{info, warn};

use crate::error::ServiceError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// Runs one logical call, repeating it on retryable failures.
pub struct RetryingCaller {
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl RetryingCaller {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, std::thread::sleep)
    }

    pub fn with_sleeper<S>(policy: RetryPolicy, sleeper: S) -> Self
    where
        S: Fn(Duration) + Send + Sync + 'static,
    {
        Self {
            policy,
            sleeper: Box::new(sleeper),
        }
    }

    /// Calls `operation` with the 1-based attempt number until it succeeds,
    /// fails non-retryably, or the attempt budget is spent. The last failure
    /// is returned as-is.
    pub fn call<T, F>(&self, label: &str, mut operation: F) -> Result<T, ServiceError>
    where
        F: FnMut(u32) -> Result<T, ServiceError>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let backoff = self.policy.delay_after_attempt(attempt);
                    info!(
                        "Retry[{}]: attempt {}/{} failed ({:?}), retrying in {:?}",
                        label, attempt, max_attempts, error.kind, backoff
                    );
                    (self.sleeper)(backoff);
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(
                            "Retry[{}]: giving up after {} attempts: {}",
                            label, attempt, error
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{RetryPolicy, RetryingCaller};
    use crate::error::{FailureKind, ServiceError};

    fn recording_caller(policy: RetryPolicy) -> (RetryingCaller, Arc<Mutex<Vec<Duration>>>) {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&delays);
        let caller = RetryingCaller::with_sleeper(policy, move |delay| {
            recorded.lock().expect("delays lock").push(delay);
        });
        (caller, delays)
    }

    fn timeout() -> ServiceError {
        ServiceError::new("Recognition", FailureKind::Timeout, "request timed out")
    }

    #[test]
    fn test_default_policy_doubles_from_three_seconds() {
        let policy = RetryPolicy::default();
        let schedule: Vec<u64> = (1..=4)
            .map(|attempt| policy.delay_after_attempt(attempt).as_secs())
            .collect();
        assert_eq!(schedule, vec![3, 6, 12, 24]);
    }

    #[test]
    fn test_persistent_timeout_fails_after_four_attempts() {
        let (caller, delays) = recording_caller(RetryPolicy::default());
        let mut attempts = 0;
        let result: Result<(), ServiceError> = caller.call("scan", |_| {
            attempts += 1;
            Err(timeout())
        });

        let error = result.expect_err("all attempts should fail");
        assert_eq!(error.kind, FailureKind::Timeout);
        assert_eq!(attempts, 4);
        assert_eq!(
            *delays.lock().expect("delays lock"),
            vec![
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(12)
            ]
        );
    }

    #[test]
    fn test_success_after_transient_failures_returns_value() {
        let (caller, delays) = recording_caller(RetryPolicy::default());
        let result = caller.call("scan", |attempt| {
            if attempt < 3 {
                Err(ServiceError::new(
                    "Recognition",
                    FailureKind::RateLimited,
                    "429",
                ))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(delays.lock().expect("delays lock").len(), 2);
    }

    #[test]
    fn test_hard_failure_is_not_retried() {
        let (caller, delays) = recording_caller(RetryPolicy::default());
        let mut attempts = 0;
        let result: Result<(), ServiceError> = caller.call("scan", |_| {
            attempts += 1;
            Err(ServiceError::new("Recognition", FailureKind::Hard, "401"))
        });
        assert_eq!(result.expect_err("should fail").kind, FailureKind::Hard);
        assert_eq!(attempts, 1);
        assert!(delays.lock().expect("delays lock").is_empty());
    }

    #[test]
    fn test_zero_attempt_policy_still_calls_once() {
        let (caller, _) = recording_caller(RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        });
        let mut attempts = 0;
        let _: Result<(), ServiceError> = caller.call("scan", |_| {
            attempts += 1;
            Err(timeout())
        });
        assert_eq!(attempts, 1);
    }
}
