//! Bounded retries with a fixed backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How often, and how far apart, to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `retries + 1` attempts in total.
    pub retries: u32,
    /// Pause between two attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Outcome of [`retry`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    /// Every attempt failed.
    Exhausted {
        /// The error of the final attempt.
        last_error: E,
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn into_result(self) -> Result<T, (E, u32)> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Exhausted {
                last_error,
                attempts,
            } => Err((last_error, attempts)),
        }
    }
}

/// Runs `operation` until it succeeds or the policy's attempts are used
/// up. The closure receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut operation: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(last_error) if attempt >= policy.attempts() => {
                return RetryOutcome::Exhausted {
                    last_error,
                    attempts: attempt,
                };
            }
            Err(e) => {
                debug!(attempt, error = %e, "attempt failed, backing off");
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    const POLICY: RetryPolicy = RetryPolicy {
        retries: 2,
        backoff: Duration::from_millis(50),
    };

    #[tokio::test(start_paused = true)]
    async fn test_retry_always_failing_makes_retries_plus_one_attempts() {
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<(), String> = retry(POLICY, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("refused".to_string()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            outcome,
            RetryOutcome::Exhausted { attempts: 3, ref last_error } if last_error == "refused"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_on_second_attempt() {
        let outcome = retry(POLICY, |attempt| async move {
            if attempt < 2 { Err("not yet") } else { Ok(attempt) }
        })
        .await;

        assert_eq!(outcome.into_result().ok(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_backoff_between_attempts() {
        let start = tokio::time::Instant::now();

        let _: RetryOutcome<(), &str> = retry(POLICY, |_| async { Err("no") }).await;

        // Two pauses between three attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_retry_zero_retries_tries_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::ZERO);

        let _: RetryOutcome<(), &str> = retry(policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("no") }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
