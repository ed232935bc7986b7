//! Error types for the delivery domain.

use crate::providers::TransportError;
use crate::storage::StorageError;
use resilience::{RetriesExhausted, TimeoutError};
use std::fmt;
use thiserror::Error;

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// A single failed validation check on an incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Dotted path of the offending field (`attachments.0.bucket`).
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur while processing a delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The envelope carried no payload data.
    #[error("Missing message data")]
    MissingData,

    /// The payload was not base64-encoded UTF-8 JSON.
    #[error("Unable to decode message payload: {0}")]
    InvalidFormat(String),

    /// The decoded event failed validation. Carries every violation found.
    #[error("Invalid email event payload: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("Unsupported workflow/template: {0}")]
    UnknownWorkflow(String),

    #[error("Unsupported attachment type: {0}")]
    UnsupportedAttachmentType(String),

    #[error("Attachment exceeds max size ({size} bytes > {limit})")]
    AttachmentTooLarge { path: String, size: u64, limit: u64 },

    #[error("Email total size exceeds limit ({total} bytes > {limit})")]
    TotalSizeExceeded { total: u64, limit: u64 },

    /// Transport failure, retryable or not depending on its code/status.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Object storage failure while fetching an attachment.
    #[error("Attachment fetch failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Template rendering error: {0}")]
    Template(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Stable, machine-readable error code.
    pub fn code(&self) -> String {
        match self {
            DeliveryError::MissingData => "MISSING_DATA".to_string(),
            DeliveryError::InvalidFormat(_) => "INVALID_MESSAGE_FORMAT".to_string(),
            DeliveryError::Validation(_) => "INVALID_EMAIL_EVENT".to_string(),
            DeliveryError::UnknownWorkflow(_) => "UNKNOWN_WORKFLOW".to_string(),
            DeliveryError::UnsupportedAttachmentType(_) => "UNSUPPORTED_ATTACHMENT_TYPE".to_string(),
            DeliveryError::AttachmentTooLarge { .. } => "ATTACHMENT_TOO_LARGE".to_string(),
            DeliveryError::TotalSizeExceeded { .. } => "EMAIL_TOO_LARGE".to_string(),
            DeliveryError::Transport(e) => e.code(),
            DeliveryError::Storage(e) => e.code.clone().unwrap_or_else(|| "STORAGE_ERROR".to_string()),
            DeliveryError::Timeout(e) => e.code().to_string(),
            DeliveryError::Template(_) => "TEMPLATE_ERROR".to_string(),
            DeliveryError::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }

    /// Whether redelivering the same event could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport(e) => e.is_retryable(),
            DeliveryError::Storage(e) => e.is_transient(),
            DeliveryError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<RetriesExhausted> for DeliveryError {
    fn from(err: RetriesExhausted) -> Self {
        DeliveryError::Internal(err.to_string())
    }
}

impl From<handlebars::RenderError> for DeliveryError {
    fn from(err: handlebars::RenderError) -> Self {
        DeliveryError::Template(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validation_message_lists_every_violation() {
        let err = DeliveryError::Validation(vec![
            FieldViolation::new("delivery_id", "delivery_id is required"),
            FieldViolation::new("recipient", "recipient must be a valid email"),
        ]);

        assert_eq!(
            err.to_string(),
            "Invalid email event payload: delivery_id: delivery_id is required, recipient: recipient must be a valid email"
        );
        assert_eq!(err.code(), "INVALID_EMAIL_EVENT");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = DeliveryError::from(TimeoutError::new(
            Duration::from_millis(10),
            resilience::DeadlineOptions::new(),
        ));

        assert!(err.is_retryable());
        assert_eq!(err.code(), "ETIMEDOUT");
    }

    #[test]
    fn test_size_errors_are_terminal() {
        let too_large = DeliveryError::AttachmentTooLarge {
            path: "a.pdf".into(),
            size: 2048,
            limit: 1024,
        };
        let total = DeliveryError::TotalSizeExceeded { total: 10, limit: 5 };

        assert_eq!(too_large.code(), "ATTACHMENT_TOO_LARGE");
        assert_eq!(total.code(), "EMAIL_TOO_LARGE");
        assert!(!too_large.is_retryable());
        assert!(!total.is_retryable());
    }

    #[test]
    fn test_transport_classification_flows_through() {
        let transient = DeliveryError::from(TransportError::with_code("ECONNRESET", "reset"));
        let fatal = DeliveryError::from(TransportError::with_status(450, "mailbox busy"));

        assert!(transient.is_retryable());
        assert_eq!(transient.code(), "ECONNRESET");
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.code(), "450");
    }
}
