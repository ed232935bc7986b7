//! Email workflows.
//!
//! Workflows are a closed set ([`WorkflowKind`]) resolved through a fixed alias table
//! built once at startup ([`WorkflowRegistry`]). Every workflow shares the same
//! [`EmailWorkflows::prepare_email`] contract: render, then fetch attachments one at a
//! time while enforcing the per-attachment and total size limits.

mod attachments;

pub use attachments::{AttachmentFetchPolicy, AttachmentLimits, is_retryable_attachment_error};

use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{Attachment, AttachmentKind, PreparedEmail};
use crate::storage::ObjectStorage;
use crate::templates::TemplateRenderer;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, info};

/// Every supported email workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum WorkflowKind {
    VerificationCode,
    PasswordReset,
    Invite,
}

impl WorkflowKind {
    /// Keys an event may use to select this workflow.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            WorkflowKind::VerificationCode => &["verification", "verification-code", "verification_code"],
            WorkflowKind::PasswordReset => &["password-reset", "password_reset"],
            WorkflowKind::Invite => &["invite"],
        }
    }

    /// Subject used when neither the request nor the template provides one.
    pub fn default_subject(self) -> &'static str {
        match self {
            WorkflowKind::VerificationCode => "Your verification code",
            WorkflowKind::PasswordReset => "Reset your password",
            WorkflowKind::Invite => "You've been invited",
        }
    }
}

/// Alias table from event keys to workflows.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    table: HashMap<&'static str, WorkflowKind>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        let table = WorkflowKind::iter()
            .flat_map(|kind| kind.aliases().iter().map(move |alias| (*alias, kind)))
            .collect();

        Self { table }
    }

    /// Resolve a workflow key, failing with [`DeliveryError::UnknownWorkflow`].
    pub fn resolve(&self, key: &str) -> DeliveryResult<WorkflowKind> {
        self.table
            .get(key)
            .copied()
            .ok_or_else(|| DeliveryError::UnknownWorkflow(key.to_string()))
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.table.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared implementation of the prepare-email contract.
pub struct EmailWorkflows {
    renderer: Arc<dyn TemplateRenderer>,
    storage: Arc<dyn ObjectStorage>,
    limits: AttachmentLimits,
    fetch_policy: AttachmentFetchPolicy,
}

impl EmailWorkflows {
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        storage: Arc<dyn ObjectStorage>,
        limits: AttachmentLimits,
        fetch_policy: AttachmentFetchPolicy,
    ) -> Self {
        Self {
            renderer,
            storage,
            limits,
            fetch_policy,
        }
    }

    /// Render the workflow templates and resolve every attachment.
    ///
    /// Attachments are fetched sequentially. The running total starts at the rendered
    /// html + text byte length and is checked after each attachment, so nothing further
    /// is fetched once the total limit is exceeded.
    pub async fn prepare_email(
        &self,
        workflow: WorkflowKind,
        payload: &Map<String, Value>,
        attachments: &[Attachment],
        correlation_id: &str,
    ) -> DeliveryResult<PreparedEmail> {
        let rendered = self.renderer.render(workflow, payload)?;

        if let Some(unsupported) = attachments
            .iter()
            .find(|a| a.kind != AttachmentKind::RemoteObject)
        {
            return Err(DeliveryError::UnsupportedAttachmentType(
                unsupported.kind.as_str().to_string(),
            ));
        }

        let mut total_size = (rendered.html.len() + rendered.text.len()) as u64;
        let mut resolved = Vec::with_capacity(attachments.len());

        for attachment in attachments {
            let fetched = attachments::fetch_attachment(
                Arc::clone(&self.storage),
                attachment,
                &self.limits,
                &self.fetch_policy,
                correlation_id,
            )
            .await?;

            total_size += fetched.size;
            if self.limits.exceeds_total(total_size) {
                return Err(DeliveryError::TotalSizeExceeded {
                    total: total_size,
                    limit: self.limits.max_total_email_size_bytes,
                });
            }

            debug!(
                correlation_id,
                filename = %fetched.filename,
                size = fetched.size,
                total_size,
                "Attachment resolved"
            );
            resolved.push(fetched);
        }

        info!(
            correlation_id,
            workflow = %workflow,
            attachments = resolved.len(),
            total_size,
            "Email prepared"
        );

        Ok(PreparedEmail {
            subject: rendered
                .subject
                .unwrap_or_else(|| workflow.default_subject().to_string()),
            html: rendered.html,
            text: rendered.text,
            attachments: resolved,
        })
    }
}
