//! Bounded retry with exponential backoff.
//!
//! ## Backoff
//!
//! The delay before the retry that follows failed attempt `n` (1-based) is
//!
//! ```text
//! delay(n) = min(base_delay * 2^(n-1), max_delay)
//! ```
//!
//! With jitter enabled the delay is drawn uniformly from `[delay * 0.8, delay * 1.2]`
//! and floored to whole milliseconds.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// The retry loop ended without a result.
///
/// Only reachable when `max_retries` is zero, since every other path either returns the
/// operation's value or its last error.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("retry loop exhausted {max_retries} attempts without returning a result")]
pub struct RetriesExhausted {
    pub max_retries: u32,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay (before jitter).
    pub max_delay: Duration,
    /// Spread delays by +/-20%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(2_000),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a jittered config from millisecond values.
    pub fn from_millis(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            jitter: true,
        }
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = exponential_delay_ms(
            duration_ms(self.base_delay),
            attempt,
            duration_ms(self.max_delay),
        );

        let delay_ms = if self.jitter {
            jittered_delay_ms(exponential)
        } else {
            exponential
        };

        Duration::from_millis(delay_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn exponential_delay_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base_ms.saturating_mul(factor).min(max_ms)
}

fn jittered_delay_ms(delay_ms: u64) -> u64 {
    if delay_ms == 0 {
        return 0;
    }

    let low = delay_ms as f64 * 0.8;
    let high = delay_ms as f64 * 1.2;
    rand::rng().random_range(low..=high).floor() as u64
}

/// Run `operation` until it succeeds, the attempt budget is spent, or `should_retry`
/// rejects the error.
///
/// - `operation` receives the 1-based attempt number.
/// - `should_retry(error, attempt)` is consulted only while attempts remain.
/// - `on_retry(error, attempt, delay)` fires before each backoff sleep.
///
/// The error of the last attempt is returned exactly as the operation produced it.
pub async fn retry_with_backoff<T, E, Op, Fut, P, H>(
    config: &RetryConfig,
    mut operation: Op,
    mut should_retry: P,
    mut on_retry: H,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E, u32) -> bool,
    H: FnMut(&E, u32, Duration),
    E: From<RetriesExhausted>,
{
    let mut attempt: u32 = 0;

    while attempt < config.max_retries {
        match operation(attempt + 1).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;

                if attempt >= config.max_retries || !should_retry(&error, attempt) {
                    return Err(error);
                }

                let delay = config.delay_for_attempt(attempt);
                on_retry(&error, attempt, delay);

                trace!(attempt, delay_ms = %delay.as_millis(), "Backing off before next attempt");
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(RetriesExhausted {
        max_retries: config.max_retries,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Failed(u32),
        Exhausted(u32),
    }

    impl From<RetriesExhausted> for TestError {
        fn from(err: RetriesExhausted) -> Self {
            TestError::Exhausted(err.max_retries)
        }
    }

    fn no_jitter(max_retries: u32, base_ms: u64, max_ms: u64) -> RetryConfig {
        RetryConfig::from_millis(max_retries, base_ms, max_ms).with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_operation_runs_exactly_max_retries_times() {
        for max_retries in 1..=5 {
            let calls = AtomicU32::new(0);
            let result: Result<(), TestError> = retry_with_backoff(
                &no_jitter(max_retries, 10, 100),
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(TestError::Failed(attempt)) }
                },
                |_, _| true,
                |_, _, _| {},
            )
            .await;

            assert_eq!(calls.load(Ordering::SeqCst), max_retries);
            // The last attempt's error comes back unchanged.
            assert_eq!(result, Err(TestError::Failed(max_retries)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_value_on_kth_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, TestError> = retry_with_backoff(
            &no_jitter(5, 0, 0),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(TestError::Failed(attempt))
                    } else {
                        Ok("success")
                    }
                }
            },
            |_, _| true,
            |_, _, _| {},
        )
        .await;

        assert_eq!(result, Ok("success"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_rejection_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_with_backoff(
            &no_jitter(5, 10, 100),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(TestError::Failed(attempt)) }
            },
            |_, _| false,
            |_, _, _| panic!("on_retry must not fire when the predicate rejects"),
        )
        .await;

        assert_eq!(result, Err(TestError::Failed(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_not_consulted_once_budget_is_spent() {
        let consulted = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&consulted);

        let _: Result<(), TestError> = retry_with_backoff(
            &no_jitter(2, 1, 1),
            |attempt| async move { Err(TestError::Failed(attempt)) },
            move |_, attempt| {
                seen.lock().unwrap().push(attempt);
                true
            },
            |_, _, _| {},
        )
        .await;

        assert_eq!(*consulted.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_receives_attempt_and_delay() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);

        let _: Result<(), TestError> = retry_with_backoff(
            &no_jitter(4, 100, 250),
            |attempt| async move { Err(TestError::Failed(attempt)) },
            |_, _| true,
            move |err, attempt, delay| {
                sink.lock().unwrap().push((format!("{:?}", err), attempt, delay));
            },
        )
        .await;

        let observed = observed.lock().unwrap();
        assert_eq!(
            *observed,
            vec![
                ("Failed(1)".to_string(), 1, Duration::from_millis(100)),
                ("Failed(2)".to_string(), 2, Duration::from_millis(200)),
                ("Failed(3)".to_string(), 3, Duration::from_millis(250)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_yields_exhausted_error() {
        let result: Result<(), TestError> = retry_with_backoff(
            &no_jitter(0, 10, 100),
            |attempt| async move { Err(TestError::Failed(attempt)) },
            |_, _| true,
            |_, _, _| {},
        )
        .await;

        assert_eq!(result, Err(TestError::Exhausted(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();

        let _: Result<(), TestError> = retry_with_backoff(
            &no_jitter(3, 100, 1_000),
            |attempt| async move { Err(TestError::Failed(attempt)) },
            |_, _| true,
            |_, _, _| {},
        )
        .await;

        // 100ms after the first failure, 200ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn test_delay_without_jitter_is_exact() {
        let config = no_jitter(10, 250, 2_000);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(1_000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(2_000));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(2_000)); // Capped
        assert_eq!(config.delay_for_attempt(64), Duration::from_millis(2_000));
    }

    #[test]
    fn test_jittered_delay_stays_within_twenty_percent() {
        let config = RetryConfig::from_millis(5, 1_000, 10_000);

        for attempt in 1..=4 {
            let nominal = 1_000u64 * 2u64.pow(attempt - 1);
            let low = nominal * 8 / 10;
            let high = nominal * 12 / 10;

            for _ in 0..200 {
                let delay = config.delay_for_attempt(attempt).as_millis() as u64;
                assert!(
                    (low..=high).contains(&delay),
                    "attempt {attempt}: {delay}ms outside [{low}, {high}]"
                );
            }
        }
    }

    #[test]
    fn test_zero_delay_stays_zero_with_jitter() {
        let config = RetryConfig::from_millis(3, 0, 0);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }
}
