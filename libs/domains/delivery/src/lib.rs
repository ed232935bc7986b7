//! Email Delivery Domain
//!
//! Turns queued email events into sent messages and keeps a best-effort record of every
//! delivery.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Envelope     │  ← { data: base64(JSON event) }
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ EmailEventHandler│  ← decode, validate, resolve workflow
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ EmailWorkflows  │  ← render templates, fetch attachments (size limits)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │TransportProvider│  ← SMTP with deadline + retry
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  StatusTracker  │  ← email.deliveries, fail-open
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_delivery::{EmailEventHandler, EmailServiceConfig, Envelope, EventContext, ServiceContext};
//! use core_config::FromEnv;
//!
//! let config = EmailServiceConfig::from_env()?;
//! let context = Arc::new(ServiceContext::from_config(&config).await?);
//! let handler = EmailEventHandler::new(context);
//!
//! handler.handle(&envelope, EventContext::default()).await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod models;
pub mod providers;
pub mod status;
pub mod storage;
pub mod templates;
pub mod workflows;

pub use config::EmailServiceConfig;
pub use context::ServiceContext;
pub use error::{DeliveryError, DeliveryResult, FieldViolation};
pub use event::{Envelope, decode_envelope, parse_envelope, validate_event};
pub use handler::{DeliveryOutcome, EmailEventHandler, EventContext, generate_correlation_id};
pub use models::{
    Attachment, AttachmentKind, DeliveryRecord, DeliveryRequest, DeliveryStatus, PreparedEmail, ResolvedAttachment,
};
pub use providers::{
    LettreTransport, MailTransport, OutboundEmail, SentEmail, SmtpSettings, TransportError, TransportProvider,
};
pub use status::{
    DeliveryStore, InMemoryDeliveryStore, PgDeliveryStore, StatusQueryService, StatusTracker, StoreError,
    status_router,
};
pub use storage::{HttpObjectStorage, ObjectMetadata, ObjectStorage, StorageError};
pub use templates::{HandlebarsRenderer, RenderedEmail, TemplateRenderer};
pub use workflows::{AttachmentFetchPolicy, AttachmentLimits, EmailWorkflows, WorkflowKind, WorkflowRegistry};
