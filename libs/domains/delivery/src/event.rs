//! Event envelope decoding and validation.
//!
//! An envelope carries `data`: base64 of the UTF-8 JSON event. Decoding failures are
//! reported as [`DeliveryError::MissingData`] or [`DeliveryError::InvalidFormat`];
//! validation collects every field violation into one [`DeliveryError::Validation`].

use crate::error::{DeliveryError, DeliveryResult, FieldViolation};
use crate::models::{Attachment, AttachmentKind, DeliveryRequest};
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{Engine, alphabet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use validator::ValidateEmail;

/// Raw queue envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Option<String>,
}

impl Envelope {
    /// Wrap a JSON event the way the upstream publisher does.
    pub fn from_event(event: &Value) -> Self {
        Self {
            data: Some(STANDARD.encode(event.to_string())),
        }
    }
}

/// Padding is optional and trailing bits are tolerated, as publishers differ on both.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode the envelope payload into JSON.
///
/// Accepts the standard and URL-safe alphabets, with or without padding.
pub fn decode_envelope(envelope: &Envelope) -> DeliveryResult<Value> {
    let data = envelope
        .data
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or(DeliveryError::MissingData)?;

    let normalized: String = data
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let bytes = LENIENT
        .decode(normalized)
        .map_err(|e| DeliveryError::InvalidFormat(format!("invalid base64: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| DeliveryError::InvalidFormat(format!("invalid JSON: {}", e)))
}

/// Decode and validate an envelope in one step.
pub fn parse_envelope(envelope: &Envelope) -> DeliveryResult<DeliveryRequest> {
    let raw = decode_envelope(envelope)?;
    validate_event(&raw)
}

/// Validate a decoded event, collecting every violation.
pub fn validate_event(raw: &Value) -> DeliveryResult<DeliveryRequest> {
    let Some(object) = raw.as_object() else {
        return Err(DeliveryError::Validation(vec![FieldViolation::new(
            "payload",
            "expected an object",
        )]));
    };

    let mut violations = Vec::new();

    let delivery_id = required_string(object, "delivery_id", &mut violations);
    let recipient = match object.get("recipient") {
        Some(Value::String(value)) if value.validate_email() => Some(value.clone()),
        _ => {
            violations.push(FieldViolation::new(
                "recipient",
                "recipient must be a valid email",
            ));
            None
        }
    };
    let template = required_string(object, "template", &mut violations);
    let workflow = optional_string(object, "workflow", &mut violations);
    let subject = optional_string(object, "subject", &mut violations);
    let headers = optional_headers(object, &mut violations);
    let payload = match object.get("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            violations.push(FieldViolation::new("payload", "expected an object"));
            Map::new()
        }
    };
    let attachments = optional_attachments(object, &mut violations);

    if !violations.is_empty() {
        return Err(DeliveryError::Validation(violations));
    }

    match (delivery_id, recipient, template) {
        (Some(delivery_id), Some(recipient), Some(template)) => Ok(DeliveryRequest {
            delivery_id,
            recipient,
            template,
            workflow,
            subject,
            headers,
            payload,
            attachments,
        }),
        _ => Err(DeliveryError::Internal(
            "validation passed without required fields".to_string(),
        )),
    }
}

fn required_string(
    object: &Map<String, Value>,
    field: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    required_string_at(object, field, field, violations)
}

fn required_string_at(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match object.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Some(value.clone()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            violations.push(FieldViolation::new(path, format!("{} is required", key)));
            None
        }
        Some(_) => {
            violations.push(FieldViolation::new(path, "expected a string"));
            None
        }
    }
}

fn optional_string(
    object: &Map<String, Value>,
    field: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    optional_string_at(object, field, field, violations)
}

fn optional_string_at(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(value)) => Some(value.clone()),
        Some(_) => {
            violations.push(FieldViolation::new(path, "expected a string"));
            None
        }
    }
}

fn optional_headers(
    object: &Map<String, Value>,
    violations: &mut Vec<FieldViolation>,
) -> BTreeMap<String, String> {
    match object.get("headers") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect(),
        Some(_) => {
            violations.push(FieldViolation::new("headers", "expected an object"));
            BTreeMap::new()
        }
    }
}

fn optional_attachments(
    object: &Map<String, Value>,
    violations: &mut Vec<FieldViolation>,
) -> Vec<Attachment> {
    let items = match object.get("attachments") {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(_) => {
            violations.push(FieldViolation::new("attachments", "expected an array"));
            return Vec::new();
        }
    };

    let mut attachments = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let prefix = format!("attachments.{}", index);
        let Some(entry) = item.as_object() else {
            violations.push(FieldViolation::new(prefix, "expected an object"));
            continue;
        };

        let kind = match optional_string_at(entry, "type", &format!("{prefix}.type"), violations) {
            Some(value) if value.is_empty() => {
                violations.push(FieldViolation::new(format!("{prefix}.type"), "type must not be empty"));
                None
            }
            Some(value) => Some(AttachmentKind::from_type(&value)),
            None => Some(AttachmentKind::RemoteObject),
        };
        let bucket = required_string_at(entry, "bucket", &format!("{prefix}.bucket"), violations);
        let path = required_string_at(entry, "path", &format!("{prefix}.path"), violations);
        let filename = optional_string_at(entry, "filename", &format!("{prefix}.filename"), violations);
        let content_type =
            optional_string_at(entry, "content_type", &format!("{prefix}.content_type"), violations);

        if let (Some(kind), Some(bucket), Some(path)) = (kind, bucket, path) {
            attachments.push(Attachment {
                kind,
                bucket,
                path,
                filename,
                content_type,
            });
        }
    }

    attachments
}
