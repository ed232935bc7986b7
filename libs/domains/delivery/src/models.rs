//! Data models for the delivery domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use strum::{AsRefStr, Display, EnumString};

// ============================================================================
// Delivery requests
// ============================================================================

/// Kind of attachment source. Only remote objects are supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Object in a bucket of the configured object store.
    RemoteObject,
    /// Anything else, rejected before any network call.
    Other(String),
}

impl AttachmentKind {
    /// Parse the wire `type` value. `gcs` is accepted as an alias.
    pub fn from_type(value: &str) -> Self {
        match value {
            "remote-object" | "gcs" => AttachmentKind::RemoteObject,
            other => AttachmentKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AttachmentKind::RemoteObject => "remote-object",
            AttachmentKind::Other(value) => value,
        }
    }
}

/// Attachment descriptor as carried on the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub bucket: String,
    pub path: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl Attachment {
    /// Explicit filename, or the last segment of the object path.
    pub fn resolved_filename(&self) -> String {
        self.filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.path
                    .rsplit('/')
                    .next()
                    .unwrap_or(self.path.as_str())
                    .to_string()
            })
    }
}

/// A decoded and validated delivery request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    /// Caller-assigned idempotency key.
    pub delivery_id: String,
    pub recipient: String,
    pub template: String,
    /// Workflow override, defaults to `template`.
    pub workflow: Option<String>,
    /// Request-level subject override.
    pub subject: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub payload: Map<String, Value>,
    pub attachments: Vec<Attachment>,
}

impl DeliveryRequest {
    /// Key used to look up the workflow.
    pub fn workflow_key(&self) -> &str {
        self.workflow
            .as_deref()
            .filter(|w| !w.is_empty())
            .unwrap_or(&self.template)
    }
}

// ============================================================================
// Prepared emails
// ============================================================================

/// Attachment with its bytes fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
    pub size: u64,
}

/// Rendered email ready for transmission. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
    pub attachments: Vec<ResolvedAttachment>,
}

// ============================================================================
// Delivery status records
// ============================================================================

/// Delivery lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    InProgress,
    Retrying,
    Sent,
    Failed,
    DeadLetter,
}

/// Durable delivery record as returned by the status query path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub delivery_id: String,
    pub workflow: String,
    pub recipient: String,
    pub status: DeliveryStatus,
    /// Monotonic, never decreases for the same delivery.
    pub attempts: i32,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub last_attempted_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Merge-only free-form map.
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn attachment(path: &str, filename: Option<&str>) -> Attachment {
        Attachment {
            kind: AttachmentKind::RemoteObject,
            bucket: "bucket".into(),
            path: path.into(),
            filename: filename.map(str::to_string),
            content_type: None,
        }
    }

    #[test]
    fn test_filename_defaults_to_last_path_segment() {
        assert_eq!(attachment("invoices/2024/a.pdf", None).resolved_filename(), "a.pdf");
        assert_eq!(attachment("plain.txt", None).resolved_filename(), "plain.txt");
        assert_eq!(attachment("x/y.pdf", Some("")).resolved_filename(), "y.pdf");
        assert_eq!(attachment("x/y.pdf", Some("z.pdf")).resolved_filename(), "z.pdf");
    }

    #[test]
    fn test_attachment_kind_aliases() {
        assert_eq!(AttachmentKind::from_type("remote-object"), AttachmentKind::RemoteObject);
        assert_eq!(AttachmentKind::from_type("gcs"), AttachmentKind::RemoteObject);
        assert_eq!(
            AttachmentKind::from_type("s3"),
            AttachmentKind::Other("s3".to_string())
        );
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        assert_eq!(DeliveryStatus::DeadLetter.to_string(), "dead_letter");
        assert_eq!(DeliveryStatus::InProgress.as_ref(), "in_progress");
        assert_eq!(DeliveryStatus::from_str("retrying"), Ok(DeliveryStatus::Retrying));
        assert!(DeliveryStatus::from_str("bogus").is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let record = DeliveryRecord {
            delivery_id: "d1".into(),
            workflow: "verification".into(),
            recipient: "a@b.com".into(),
            status: DeliveryStatus::Sent,
            attempts: 1,
            last_error_code: None,
            last_error_message: None,
            queued_at: Some(now),
            last_attempted_at: Some(now),
            sent_at: Some(now),
            created_at: now,
            updated_at: now,
            metadata: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["deliveryId"], "d1");
        assert_eq!(json["status"], "sent");
        assert!(json.get("lastErrorCode").is_some());
    }
}
