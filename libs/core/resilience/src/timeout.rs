//! Deadline racing.
//!
//! [`with_deadline`] spawns the operation onto the runtime and races it against a timer.
//! When the timer wins the caller gets a [`TimeoutError`] right away, while the spawned
//! operation keeps running detached until it settles on its own.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// The deadline fired before the operation settled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TimeoutError {
    /// Human readable description.
    pub message: String,
    /// Deadline that was exceeded.
    pub timeout: Duration,
    /// Caller supplied context (ids, paths, hosts).
    pub metadata: BTreeMap<String, String>,
}

impl TimeoutError {
    /// Stable error code shared with network-level timeouts.
    pub const CODE: &'static str = "ETIMEDOUT";

    /// Build a timeout error, generating a message when none is configured.
    pub fn new(timeout: Duration, options: DeadlineOptions) -> Self {
        let message = options
            .message
            .unwrap_or_else(|| format!("Operation timed out after {}ms", timeout.as_millis()));

        Self {
            message,
            timeout,
            metadata: options.metadata,
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        Self::CODE
    }
}

/// Message and metadata attached to a [`TimeoutError`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeadlineOptions {
    pub message: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl DeadlineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Race `operation` against `timeout`.
///
/// Returns the operation's own result or error when it settles first. When the deadline
/// fires first a [`TimeoutError`] built from `options` is returned and the operation is
/// left running in the background. A panic inside the operation is resumed on the caller.
pub async fn with_deadline<T, E, F>(
    operation: F,
    timeout: Duration,
    options: DeadlineOptions,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<TimeoutError> + Send + 'static,
{
    let mut handle = tokio::spawn(operation);

    tokio::select! {
        biased;

        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(join_error) => match join_error.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                // Only happens while the runtime shuts down.
                Err(_) => Err(TimeoutError::new(
                    timeout,
                    options.with_message("Operation was cancelled before it settled"),
                )
                .into()),
            },
        },
        () = tokio::time::sleep(timeout) => {
            debug!(
                timeout_ms = %timeout.as_millis(),
                "Deadline elapsed, leaving operation running in the background"
            );
            // Dropping the handle detaches the task.
            drop(handle);
            Err(TimeoutError::new(timeout, options).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Timeout(TimeoutError),
        Failed(&'static str),
    }

    impl From<TimeoutError> for TestError {
        fn from(err: TimeoutError) -> Self {
            TestError::Timeout(err)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_result_when_operation_finishes_first() {
        let result: Result<u32, TestError> = with_deadline(
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(42)
            },
            Duration::from_millis(100),
            DeadlineOptions::new(),
        )
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagates_operation_error() {
        let result: Result<u32, TestError> = with_deadline(
            async { Err(TestError::Failed("boom")) },
            Duration::from_millis(100),
            DeadlineOptions::new(),
        )
        .await;

        assert_eq!(result, Err(TestError::Failed("boom")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_message_and_metadata() {
        let result: Result<u32, TestError> = with_deadline(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            },
            Duration::from_millis(50),
            DeadlineOptions::new()
                .with_message("SMTP send timed out")
                .with_metadata("delivery_id", "d1"),
        )
        .await;

        let Err(TestError::Timeout(err)) = result else {
            panic!("expected a timeout, got {:?}", result);
        };
        assert_eq!(err.message, "SMTP send timed out");
        assert_eq!(err.metadata.get("delivery_id").map(String::as_str), Some("d1"));
        assert_eq!(err.timeout, Duration::from_millis(50));
        assert_eq!(err.code(), "ETIMEDOUT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_message_mentions_timeout() {
        let result: Result<(), TestError> = with_deadline(
            std::future::pending(),
            Duration::from_millis(75),
            DeadlineOptions::new(),
        )
        .await;

        let Err(TestError::Timeout(err)) = result else {
            panic!("expected a timeout");
        };
        assert_eq!(err.to_string(), "Operation timed out after 75ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_keeps_running_after_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let result: Result<(), TestError> = with_deadline(
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(10),
            DeadlineOptions::new(),
        )
        .await;

        assert!(matches!(result, Err(TestError::Timeout(_))));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
