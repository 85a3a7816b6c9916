//! Bounded retry with a pluggable sleeper.
//!
//! Connection bootstrap is the only place in the pipeline that retries. The
//! loop is generic over the attempted operation so the same policy can wrap
//! any connect call, and the delay between attempts goes through the
//! [`Sleeper`] trait so tests can observe the schedule without waiting.

use std::future::Future;
use std::time::Duration;

/// Default number of attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay between attempts in seconds.
pub const DEFAULT_DELAY_SECS: u64 = 5;

/// Delay schedule between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait the same duration after every failure.
    Fixed(Duration),
    /// Double the wait after every failure, starting at `base`, capped at `max`.
    Exponential {
        /// Delay after the first failure.
        base: Duration,
        /// Upper bound on any single delay.
        max: Duration,
    },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => {
                let factor = 2_u32
                    .checked_pow(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `0` is treated as `1`.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy with a fixed delay between attempts.
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Number of attempts the policy actually allows.
    pub const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_secs(DEFAULT_DELAY_SECS),
        )
    }
}

/// Something that can wait for a duration.
pub trait Sleeper {
    /// Wait for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Sleeps on the `tokio` timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// `attempt` receives the 1-based attempt number. Every attempt is logged;
/// failures before the last are logged with their cause and followed by a
/// sleep of [`Backoff::delay_after`]. No sleep follows the final attempt.
///
/// # Errors
///
/// Returns the error of the last attempt once all attempts have failed.
pub async fn retry<T, E, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: &S,
    operation: &str,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: core::fmt::Display,
    S: Sleeper,
{
    let max_attempts = policy.attempts();
    let mut current: u32 = 1;
    loop {
        tracing::info!(operation, attempt = current, max_attempts, "Attempting");
        match attempt(current).await {
            Ok(value) => {
                tracing::info!(operation, attempt = current, "Attempt succeeded");
                return Ok(value);
            }
            Err(e) if current < max_attempts => {
                let delay = policy.backoff.delay_after(current);
                tracing::warn!(
                    operation,
                    attempt = current,
                    error = %e,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Attempt failed, retrying"
                );
                sleeper.sleep(delay).await;
                current = current.saturating_add(1);
            }
            Err(e) => {
                tracing::error!(
                    operation,
                    attempts = current,
                    error = %e,
                    "All attempts failed"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
            self.slept.lock().unwrap().push(duration);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn succeeds_after_k_failures() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(5));
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = retry(&policy, &sleeper, "connect", |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n <= 2 {
                    Err(format!("refused on attempt {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.slept(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn first_attempt_success_never_sleeps() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();

        let result: Result<&str, String> =
            retry(&policy, &sleeper, "connect", |_| async { Ok("live") }).await;

        assert_eq!(result.unwrap(), "live");
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test]
    async fn always_failing_returns_last_error() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(5));
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry(&policy, &sleeper, "connect", |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("refused on attempt {n}")) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "refused on attempt 5");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(sleeper.slept().len(), 4);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), &str> = retry(&policy, &sleeper, "connect", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_waits_on_the_timer() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay_after(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_after(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_after(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_after(5), Duration::from_secs(10));
        assert_eq!(backoff.delay_after(64), Duration::from_secs(10));
    }

    #[test]
    fn default_policy_is_five_attempts_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 5);
        assert_eq!(policy.backoff, Backoff::Fixed(Duration::from_secs(5)));
    }
}
