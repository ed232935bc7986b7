//! Object storage client used to fetch attachment bytes.
//!
//! [`HttpObjectStorage`] talks to a GCS-compatible JSON API:
//! `GET {base}/storage/v1/b/{bucket}/o/{object}` for metadata and the same URL with
//! `?alt=media` for the content.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Network error codes treated as transient for storage calls.
pub const TRANSIENT_STORAGE_CODES: &[&str] = &["ETIMEDOUT", "ESOCKETTIMEDOUT", "ECONNRESET", "EAI_AGAIN"];

/// Reported failure reasons treated as transient.
pub const TRANSIENT_STORAGE_REASONS: &[&str] = &["internalError", "backendError"];

/// Object storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StorageError {
    /// Network level code (`ECONNRESET`, ...).
    pub code: Option<String>,
    /// HTTP status, when a response was received.
    pub status: Option<u16>,
    /// Reasons reported by the storage API (`backendError`, ...).
    pub reasons: Vec<String>,
    pub message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            status: None,
            reasons: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Transient network code, or a transient reason reported by the API.
    pub fn is_transient(&self) -> bool {
        let transient_code = self
            .code
            .as_deref()
            .is_some_and(|code| TRANSIENT_STORAGE_CODES.contains(&code));
        let transient_reason = self
            .reasons
            .iter()
            .any(|reason| TRANSIENT_STORAGE_REASONS.contains(&reason.as_str()));

        transient_code || transient_reason
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: Option<String>,
}

/// Read access to a bucket/path addressed object store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Fetch size and content type without downloading the object.
    async fn metadata(&self, bucket: &str, path: &str) -> Result<ObjectMetadata, StorageError>;

    /// Download the full object.
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError>;
}

/// GCS JSON API client built on reqwest.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StorageError::new(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            urlencoding::encode(bucket),
            urlencoding::encode(path)
        )
    }

    async fn get(&self, url: &str, media: bool) -> Result<reqwest::Response, StorageError> {
        let mut request = self.client.get(url);
        if media {
            request = request.query(&[("alt", "media")]);
        }
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(map_request_error)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &body))
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn metadata(&self, bucket: &str, path: &str) -> Result<ObjectMetadata, StorageError> {
        let url = self.object_url(bucket, path);
        debug!(bucket, path, "Fetching object metadata");

        let resource: ObjectResource = self
            .get(&url, false)
            .await?
            .json()
            .await
            .map_err(map_request_error)?;

        let size = match resource.size.as_deref() {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|e| StorageError::new(format!("Invalid object size '{}': {}", raw, e)))?,
            None => 0,
        };

        Ok(ObjectMetadata {
            size,
            content_type: resource.content_type,
        })
    }

    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(bucket, path);
        debug!(bucket, path, "Downloading object");

        let bytes = self
            .get(&url, true)
            .await?
            .bytes()
            .await
            .map_err(map_request_error)?;

        Ok(bytes.to_vec())
    }
}

fn map_request_error(err: reqwest::Error) -> StorageError {
    let storage_error = StorageError::new(format!("Storage request failed: {}", err));

    if err.is_timeout() {
        storage_error.with_code("ETIMEDOUT")
    } else if err.is_connect() || err.is_body() {
        storage_error.with_code("ECONNRESET")
    } else {
        storage_error
    }
}

fn error_from_response(status: u16, body: &str) -> StorageError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();

    let message = parsed
        .as_ref()
        .and_then(|e| e.error.message.clone())
        .unwrap_or_else(|| format!("Storage responded with HTTP {}", status));

    let mut reasons: Vec<String> = parsed
        .map(|e| e.error.errors.into_iter().filter_map(|item| item.reason).collect())
        .unwrap_or_default();

    if reasons.is_empty() {
        match status {
            429 => reasons.push("rateLimitExceeded".to_string()),
            500..=599 => reasons.push("backendError".to_string()),
            _ => {}
        }
    }

    StorageError {
        code: None,
        status: Some(status),
        reasons,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_codes_and_reasons() {
        assert!(StorageError::new("x").with_code("ECONNRESET").is_transient());
        assert!(StorageError::new("x").with_code("EAI_AGAIN").is_transient());
        assert!(StorageError::new("x").with_reason("backendError").is_transient());
        assert!(StorageError::new("x").with_reason("internalError").is_transient());

        assert!(!StorageError::new("x").with_code("ENOENT").is_transient());
        assert!(!StorageError::new("x").with_reason("notFound").is_transient());
        assert!(!StorageError::new("x").is_transient());
    }

    #[test]
    fn test_error_body_reasons_are_parsed() {
        let body = r#"{"error":{"code":503,"message":"Backend unavailable","errors":[{"reason":"backendError"}]}}"#;
        let err = error_from_response(503, body);

        assert_eq!(err.message, "Backend unavailable");
        assert_eq!(err.reasons, vec!["backendError".to_string()]);
        assert_eq!(err.status, Some(503));
        assert!(err.is_transient());
    }

    #[test]
    fn test_unparsable_body_synthesizes_reason() {
        assert!(error_from_response(502, "<html>bad gateway</html>").is_transient());

        let throttled = error_from_response(429, "");
        assert_eq!(throttled.reasons, vec!["rateLimitExceeded".to_string()]);
        assert!(!throttled.is_transient());

        let missing = error_from_response(404, r#"{"error":{"message":"No such object","errors":[{"reason":"notFound"}]}}"#);
        assert_eq!(missing.message, "No such object");
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_object_url_encodes_path() {
        let storage = HttpObjectStorage::new("https://storage.example.com/", None).unwrap();

        assert_eq!(
            storage.object_url("docs", "invoices/2024 q1.pdf"),
            "https://storage.example.com/storage/v1/b/docs/o/invoices%2F2024%20q1.pdf"
        );
    }
}
