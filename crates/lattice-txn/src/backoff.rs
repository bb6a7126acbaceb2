//! Bounded exponential backoff for transient storage errors.
//!
//! Every transaction-store call that crosses to the durable partition is
//! wrapped in [`run_with_retries`]: transient errors are retried with
//! jittered exponential delays, permanent errors surface immediately, and
//! exhausted budgets surface the last transient error to the caller.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use lattice_common::{
    LatticeError, LatticeResult, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_ATTEMPTS,
    DEFAULT_RETRY_MAX_DELAY_MS,
};

/// Retry budget and delay curve for transient storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy with delays short enough for unit tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> LatticeResult<()> {
        if self.max_attempts == 0 {
            return Err(LatticeError::InvalidConfig {
                message: "retry max_attempts must be at least 1".to_string(),
            });
        }
        if self.base_delay > self.max_delay {
            return Err(LatticeError::InvalidConfig {
                message: "retry base_delay must not exceed max_delay".to_string(),
            });
        }
        Ok(())
    }

    /// Delay before the retry following zero-based `attempt`, with equal
    /// jitter so concurrent callers spread out.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let cap_ms = self.max_delay.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp_ms.min(cap_ms).max(1);
        let half = capped / 2;
        let jitter = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis((half + jitter).max(1))
    }
}

/// Runs `op`, retrying on retryable errors per `policy`.
///
/// Sleeps on the calling thread between attempts; callers on async
/// executors must not invoke this from a reactor thread.
pub fn run_with_retries<T, F>(policy: &RetryPolicy, mut op: F) -> LatticeResult<T>
where
    F: FnMut() -> LatticeResult<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient storage error, backing off"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    #[test]
    fn test_delay_bounds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        for attempt in 0..10 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= policy.max_delay);
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());

        let zero_attempts = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(zero_attempts.validate().is_err());

        let inverted = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_retries_until_success() {
        let policy = RetryPolicy::for_testing();
        let calls = AtomicU32::new(0);
        let result = run_with_retries(&policy, || {
            if calls.fetch_add(1, AtomicOrdering::SeqCst) < 2 {
                Err(LatticeError::unavailable("flaky"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_budget_surfaces_last_error() {
        let policy = RetryPolicy::for_testing();
        let calls = AtomicU32::new(0);
        let result: LatticeResult<()> = run_with_retries(&policy, || {
            calls.fetch_add(1, AtomicOrdering::SeqCst);
            Err(LatticeError::unavailable("down"))
        });
        assert!(matches!(
            result,
            Err(LatticeError::StorageUnavailable { .. })
        ));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), policy.max_attempts);
    }

    #[test]
    fn test_permanent_errors_not_retried() {
        let policy = RetryPolicy::for_testing();
        let calls = AtomicU32::new(0);
        let result: LatticeResult<()> = run_with_retries(&policy, || {
            calls.fetch_add(1, AtomicOrdering::SeqCst);
            Err(LatticeError::internal("broken"))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }
}
