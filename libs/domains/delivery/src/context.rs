//! Long-lived collaborators shared by every event.
//!
//! Built once at process start and handed to the [`EmailEventHandler`](crate::EmailEventHandler).

use crate::config::EmailServiceConfig;
use crate::error::DeliveryResult;
use crate::providers::{LettreTransport, TransportProvider};
use crate::status::{self, PgDeliveryStore, StatusTracker};
use crate::storage::HttpObjectStorage;
use crate::templates::HandlebarsRenderer;
use crate::workflows::{EmailWorkflows, WorkflowRegistry};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_EVENT_MAX_ATTEMPTS: u32 = 5;

pub struct ServiceContext {
    pub registry: WorkflowRegistry,
    pub workflows: EmailWorkflows,
    pub provider: TransportProvider,
    pub tracker: StatusTracker,
    /// Redelivery budget of the invoking queue.
    pub event_max_attempts: u32,
}

impl ServiceContext {
    pub fn new(workflows: EmailWorkflows, provider: TransportProvider, tracker: StatusTracker) -> Self {
        Self {
            registry: WorkflowRegistry::new(),
            workflows,
            provider,
            tracker,
            event_max_attempts: DEFAULT_EVENT_MAX_ATTEMPTS,
        }
    }

    pub fn with_event_max_attempts(mut self, attempts: u32) -> Self {
        self.event_max_attempts = attempts;
        self
    }

    /// Build the production collaborators from configuration.
    ///
    /// An unreachable SMTP server or status database only produces a warning.
    pub async fn from_config(config: &EmailServiceConfig) -> DeliveryResult<Self> {
        let renderer = Arc::new(HandlebarsRenderer::new()?);
        let storage = Arc::new(HttpObjectStorage::new(
            config.storage_base_url.clone(),
            config.storage_access_token.clone(),
        )?);
        let workflows = EmailWorkflows::new(
            renderer,
            storage,
            config.attachment_limits(),
            config.attachment_fetch_policy(),
        );

        let transport = LettreTransport::new(
            config.smtp_settings(),
            &config.mail_from,
            config.mail_from_name.as_deref(),
        )?;
        match transport.verify().await {
            Ok(()) => info!(host = %config.smtp_host, port = config.smtp_port, "SMTP transport verified"),
            Err(e) => warn!(
                host = %config.smtp_host,
                port = config.smtp_port,
                error_code = %e.code(),
                error = %e,
                "SMTP verification failed, continuing"
            ),
        }
        let provider = TransportProvider::new(Arc::new(transport), config.smtp_send_timeout(), config.smtp_retry());

        let tracker = match &config.status_database_url {
            Some(url) => match status::connect(url).await {
                Ok(db) => StatusTracker::new(Arc::new(PgDeliveryStore::new(db))),
                Err(e) => {
                    warn!(error = %e, "Failed to connect to the delivery status database");
                    StatusTracker::disabled()
                }
            },
            None => StatusTracker::disabled(),
        };

        info!(
            workflows = ?WorkflowRegistry::new().keys(),
            tracking = tracker.is_enabled(),
            max_attachment_size = config.max_attachment_size_bytes,
            max_total_size = config.max_total_email_size_bytes,
            "Email service context ready"
        );

        Ok(Self::new(workflows, provider, tracker).with_event_max_attempts(config.event_max_attempts))
    }
}
