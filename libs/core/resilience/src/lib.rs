//! Resilience primitives
//!
//! Small building blocks shared by everything that talks to the network:
//!
//! - **Retry**: [`retry_with_backoff`] runs an operation up to `max_retries` times with
//!   exponential, optionally jittered, backoff. A caller-supplied predicate decides which
//!   errors are worth another attempt and the original error is returned untouched.
//! - **Deadline**: [`with_deadline`] races an operation against a timer and yields a
//!   [`TimeoutError`] if the timer wins. The operation is detached, not cancelled.
//!
//! ## Example
//!
//! ```ignore
//! use resilience::{retry_with_backoff, with_deadline, DeadlineOptions, RetryConfig};
//!
//! let config = RetryConfig::from_millis(3, 250, 2_000);
//! let receipt = retry_with_backoff(
//!     &config,
//!     |attempt| with_deadline(send(attempt), timeout, DeadlineOptions::new()),
//!     |err: &MyError, _attempt| err.is_retryable(),
//!     |err, attempt, delay| tracing::warn!(%err, attempt, ?delay, "Retrying"),
//! )
//! .await?;
//! ```

mod retry;
mod timeout;

pub use retry::{retry_with_backoff, RetriesExhausted, RetryConfig};
pub use timeout::{with_deadline, DeadlineOptions, TimeoutError};
