use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{Attachment, ResolvedAttachment};
use crate::storage::ObjectStorage;
use resilience::{DeadlineOptions, RetryConfig, retry_with_backoff, with_deadline};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Size limits enforced while preparing an email. Zero disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLimits {
    pub max_attachment_size_bytes: u64,
    pub max_total_email_size_bytes: u64,
}

impl Default for AttachmentLimits {
    fn default() -> Self {
        Self {
            max_attachment_size_bytes: 25 * 1024 * 1024,
            max_total_email_size_bytes: 50 * 1024 * 1024,
        }
    }
}

impl AttachmentLimits {
    fn exceeds_single(&self, size: u64) -> bool {
        self.max_attachment_size_bytes > 0 && size > self.max_attachment_size_bytes
    }

    pub(super) fn exceeds_total(&self, total: u64) -> bool {
        self.max_total_email_size_bytes > 0 && total > self.max_total_email_size_bytes
    }
}

/// Deadline and retry budget for each attachment fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFetchPolicy {
    /// Applied separately to the metadata call and to the download.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for AttachmentFetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5_000),
            retry: RetryConfig::from_millis(3, 200, 1_500),
        }
    }
}

/// Timeouts and transient storage failures are retried, everything else is final.
pub fn is_retryable_attachment_error(error: &DeliveryError) -> bool {
    match error {
        DeliveryError::Timeout(_) => true,
        DeliveryError::Storage(e) => e.is_transient(),
        _ => false,
    }
}

pub(super) async fn fetch_attachment(
    storage: Arc<dyn ObjectStorage>,
    attachment: &Attachment,
    limits: &AttachmentLimits,
    policy: &AttachmentFetchPolicy,
    correlation_id: &str,
) -> DeliveryResult<ResolvedAttachment> {
    let bucket = attachment.bucket.as_str();
    let path = attachment.path.as_str();

    retry_with_backoff(
        &policy.retry,
        |attempt| {
            let storage = Arc::clone(&storage);
            let bucket = bucket.to_string();
            let path = path.to_string();
            let timeout = policy.timeout;
            let limits = *limits;
            let filename = attachment.resolved_filename();
            let requested_type = attachment.content_type.clone();

            async move {
                debug!(bucket = %bucket, path = %path, attempt, "Fetching attachment metadata");

                let metadata = with_deadline(
                    {
                        let (storage, bucket, path) = (Arc::clone(&storage), bucket.clone(), path.clone());
                        async move { storage.metadata(&bucket, &path).await.map_err(DeliveryError::from) }
                    },
                    timeout,
                    deadline_options("Timeout while fetching attachment metadata", &bucket, &path),
                )
                .await?;

                if limits.exceeds_single(metadata.size) {
                    return Err(DeliveryError::AttachmentTooLarge {
                        path: path.clone(),
                        size: metadata.size,
                        limit: limits.max_attachment_size_bytes,
                    });
                }

                debug!(bucket = %bucket, path = %path, attempt, "Downloading attachment content");

                let content = with_deadline(
                    {
                        let (storage, bucket, path) = (Arc::clone(&storage), bucket.clone(), path.clone());
                        async move { storage.download(&bucket, &path).await.map_err(DeliveryError::from) }
                    },
                    timeout,
                    deadline_options("Timeout while downloading attachment content", &bucket, &path),
                )
                .await?;

                let size = metadata.size.max(content.len() as u64);
                let content_type = requested_type
                    .filter(|ct| !ct.is_empty())
                    .or(metadata.content_type)
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

                Ok(ResolvedAttachment {
                    filename,
                    content,
                    content_type,
                    size,
                })
            }
        },
        |error, _| is_retryable_attachment_error(error),
        |error, attempt, delay| {
            warn!(
                correlation_id,
                bucket,
                path,
                attempt,
                delay_ms = %delay.as_millis(),
                error = %error,
                "Retrying attachment fetch"
            );
        },
    )
    .await
}

fn deadline_options(message: &str, bucket: &str, path: &str) -> DeadlineOptions {
    DeadlineOptions::new()
        .with_message(message)
        .with_metadata("attachment", path)
        .with_metadata("bucket", bucket)
}
