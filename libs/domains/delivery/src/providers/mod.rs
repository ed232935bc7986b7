//! Mail transport and the retrying send path.
//!
//! [`MailTransport`] is the raw transmit call. [`TransportProvider`] wraps it with the
//! send deadline and the retry policy.

mod smtp;

pub use smtp::{LettreTransport, SmtpSettings};

use crate::error::{DeliveryError, DeliveryResult};
use crate::models::ResolvedAttachment;
use async_trait::async_trait;
use resilience::{DeadlineOptions, RetryConfig, retry_with_backoff, with_deadline};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Network error codes treated as transient for transport calls.
pub const RETRYABLE_TRANSPORT_CODES: &[&str] =
    &["ETIMEDOUT", "ESOCKET", "ECONNECTION", "ECONNRESET", "EPIPE", "EAI_AGAIN"];

/// Failure reported by a [`MailTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// Network level code (`ECONNRESET`, `EENVELOPE`, ...).
    pub code: Option<String>,
    /// Responder status code.
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Code, else status, else a generic fallback.
    pub fn code(&self) -> String {
        self.code
            .clone()
            .or_else(|| self.status.map(|s| s.to_string()))
            .unwrap_or_else(|| "TRANSPORT_ERROR".to_string())
    }

    /// Transient network code, or any status of 500 and above.
    pub fn is_retryable(&self) -> bool {
        let transient_code = self
            .code
            .as_deref()
            .is_some_and(|code| RETRYABLE_TRANSPORT_CODES.contains(&code));

        transient_code || self.status.is_some_and(|status| status >= 500)
    }
}

/// Retry predicate for the send path.
pub fn is_retryable_transport_error(error: &DeliveryError) -> bool {
    match error {
        DeliveryError::Timeout(_) => true,
        DeliveryError::Transport(e) => e.is_retryable(),
        _ => false,
    }
}

/// Fully prepared outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub delivery_id: String,
    pub recipient: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub headers: BTreeMap<String, String>,
    pub attachments: Vec<ResolvedAttachment>,
}

/// Transport acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentEmail {
    pub message_id: Option<String>,
    pub response: Option<String>,
}

/// Raw transmit call, one attempt per invocation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn transmit(&self, email: &OutboundEmail) -> Result<SentEmail, TransportError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Sends through a [`MailTransport`] under a deadline, retrying transient failures.
pub struct TransportProvider {
    transport: Arc<dyn MailTransport>,
    send_timeout: Duration,
    retry: RetryConfig,
}

impl TransportProvider {
    pub fn new(transport: Arc<dyn MailTransport>, send_timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            transport,
            send_timeout,
            retry,
        }
    }

    /// Transmit `email`. On exhaustion the last error is returned unchanged.
    pub async fn send(&self, email: OutboundEmail, correlation_id: &str) -> DeliveryResult<SentEmail> {
        let email = Arc::new(email);
        let delivery_id = email.delivery_id.as_str();
        let recipient = email.recipient.as_str();
        let provider = self.transport.name();

        retry_with_backoff(
            &self.retry,
            |attempt| {
                let transport = Arc::clone(&self.transport);
                let outbound = Arc::clone(&email);
                let options = DeadlineOptions::new()
                    .with_message("SMTP send timed out")
                    .with_metadata("delivery_id", delivery_id)
                    .with_metadata("recipient", recipient)
                    .with_metadata("correlation_id", correlation_id);
                let send_timeout = self.send_timeout;

                async move {
                    let start = Instant::now();
                    debug!(delivery_id, recipient, correlation_id, attempt, provider, "Sending email");

                    let result = with_deadline(
                        async move { transport.transmit(&outbound).await.map_err(DeliveryError::from) },
                        send_timeout,
                        options,
                    )
                    .await;

                    match &result {
                        Ok(_) => info!(
                            delivery_id,
                            recipient,
                            correlation_id,
                            attempt,
                            latency_ms = %start.elapsed().as_millis(),
                            "Email delivered successfully"
                        ),
                        Err(e) => warn!(
                            delivery_id,
                            correlation_id,
                            attempt,
                            error_code = %e.code(),
                            error = %e,
                            "Send attempt failed"
                        ),
                    }

                    result
                }
            },
            |error, attempt| {
                let retryable = is_retryable_transport_error(error);
                if !retryable {
                    error!(
                        delivery_id,
                        correlation_id,
                        attempt,
                        error_code = %error.code(),
                        error = %error,
                        "Transport error is not retryable"
                    );
                }
                retryable
            },
            |error, attempt, delay| {
                warn!(
                    delivery_id,
                    correlation_id,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %error,
                    "Retrying email delivery"
                );
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn outbound() -> OutboundEmail {
        OutboundEmail {
            delivery_id: "d1".into(),
            recipient: "a@b.com".into(),
            subject: "Hello".into(),
            html: "<p>hi</p>".into(),
            text: "hi".into(),
            headers: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }

    fn provider(transport: MockMailTransport, max_retries: u32) -> TransportProvider {
        TransportProvider::new(
            Arc::new(transport),
            Duration::from_millis(100),
            RetryConfig::from_millis(max_retries, 1, 2).with_jitter(false),
        )
    }

    #[test]
    fn test_retryable_classification() {
        for code in RETRYABLE_TRANSPORT_CODES {
            assert!(TransportError::with_code(*code, "x").is_retryable(), "{code}");
        }
        assert!(TransportError::with_status(500, "x").is_retryable());
        assert!(TransportError::with_status(554, "x").is_retryable());

        assert!(!TransportError::with_status(421, "x").is_retryable());
        assert!(!TransportError::with_code("EAUTH", "x").is_retryable());
        assert!(!TransportError::with_code("EENVELOPE", "x").is_retryable());
    }

    #[test]
    fn test_code_falls_back_to_status() {
        assert_eq!(TransportError::with_status(550, "x").code(), "550");
        assert_eq!(TransportError::with_code("EPIPE", "x").code(), "EPIPE");
        assert_eq!(
            TransportError {
                code: None,
                status: None,
                message: "x".into()
            }
            .code(),
            "TRANSPORT_ERROR"
        );
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut transport = MockMailTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_transmit().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::with_code("ECONNRESET", "connection reset"))
            } else {
                Ok(SentEmail {
                    message_id: Some("<id@test>".into()),
                    response: None,
                })
            }
        });

        let sent = provider(transport, 3).send(outbound(), "email-test").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sent.message_id.as_deref(), Some("<id@test>"));
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let mut transport = MockMailTransport::new();
        transport.expect_name().return_const("mock");
        transport
            .expect_transmit()
            .times(1)
            .returning(|_| Err(TransportError::with_code("EAUTH", "bad credentials")));

        let err = provider(transport, 3).send(outbound(), "email-test").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Transport(ref e) if e.code.as_deref() == Some("EAUTH")));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let mut transport = MockMailTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_transmit().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err(TransportError::with_status(500 + n as u16, format!("failure {}", n)))
        });

        let err = provider(transport, 2).send(outbound(), "email-test").await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.to_string(), "failure 2");
        assert_eq!(err.code(), "502");
    }

    #[tokio::test]
    async fn test_slow_transport_times_out_and_is_retried() {
        struct SlowTransport {
            calls: AtomicU32,
        }

        #[async_trait]
        impl MailTransport for SlowTransport {
            async fn transmit(&self, _email: &OutboundEmail) -> Result<SentEmail, TransportError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(SentEmail::default())
            }

            fn name(&self) -> &'static str {
                "slow"
            }
        }

        let transport = Arc::new(SlowTransport {
            calls: AtomicU32::new(0),
        });
        let provider = TransportProvider::new(
            transport.clone(),
            Duration::from_millis(20),
            RetryConfig::from_millis(2, 1, 1).with_jitter(false),
        );

        let err = provider.send(outbound(), "email-test").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Timeout(ref t) if t.message == "SMTP send timed out"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
