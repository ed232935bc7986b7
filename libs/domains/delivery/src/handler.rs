//! Per-event entry point of the pipeline.
//!
//! decode → validate → resolve workflow → track queued/in-progress → prepare → send →
//! track the outcome. Tracking never changes the result of an event.

use crate::context::ServiceContext;
use crate::error::{DeliveryError, DeliveryResult};
use crate::event::{Envelope, parse_envelope};
use crate::models::DeliveryRequest;
use crate::providers::{OutboundEmail, SentEmail};
use crate::workflows::WorkflowKind;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{Instrument, Span, debug, error, field, info, info_span};
use uuid::Uuid;

/// Invocation details supplied by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub event_id: Option<String>,
    /// 1-based delivery attempt of this event.
    pub attempt: u32,
}

impl Default for EventContext {
    fn default() -> Self {
        Self {
            event_id: None,
            attempt: 1,
        }
    }
}

impl EventContext {
    pub fn new(event_id: Option<String>, attempt: u32) -> Self {
        Self { event_id, attempt }
    }
}

/// Outcome of a successfully delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub delivery_id: String,
    pub correlation_id: String,
    pub workflow: WorkflowKind,
    pub sent: SentEmail,
}

pub fn generate_correlation_id() -> String {
    format!("email-{}", Uuid::new_v4())
}

pub struct EmailEventHandler {
    context: Arc<ServiceContext>,
}

impl EmailEventHandler {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    /// Process one envelope. The returned error carries the stable code the queue uses to
    /// decide on redelivery.
    pub async fn handle(&self, envelope: &Envelope, event: EventContext) -> DeliveryResult<DeliveryOutcome> {
        let event_id = event
            .event_id
            .clone()
            .unwrap_or_else(|| format!("email-{}", Utc::now().timestamp_millis()));
        let correlation_id = generate_correlation_id();
        let span = info_span!(
            "email_event",
            event_id = %event_id,
            correlation_id = %correlation_id,
            delivery_id = field::Empty
        );

        let result = self
            .process(envelope, event.attempt, &event_id, &correlation_id)
            .instrument(span.clone())
            .await;

        if let Err(e) = &result {
            span.in_scope(|| {
                error!(
                    error = %e,
                    error_code = %e.code(),
                    attempt = event.attempt,
                    retryable = e.is_retryable(),
                    "Email event processing failed"
                )
            });
        }

        result
    }

    async fn process(
        &self,
        envelope: &Envelope,
        attempt: u32,
        event_id: &str,
        correlation_id: &str,
    ) -> DeliveryResult<DeliveryOutcome> {
        let request = parse_envelope(envelope)?;
        // Every later log line of this event, failures included, carries the delivery id.
        Span::current().record("delivery_id", request.delivery_id.as_str());

        let workflow_key = request.workflow_key().to_string();
        let workflow = self.context.registry.resolve(&workflow_key)?;

        debug!(
            delivery_id = %request.delivery_id,
            workflow = %workflow,
            attachments = request.attachments.len(),
            "Received email event"
        );

        let tracker = &self.context.tracker;
        tracker
            .record_queued(
                &request.delivery_id,
                &workflow_key,
                &request.recipient,
                Some(json!({
                    "correlation_id": correlation_id,
                    "event_id": event_id,
                    "template": request.template,
                })),
            )
            .await;
        tracker.mark_in_progress(&request.delivery_id, attempt).await;

        match self.deliver(&request, workflow, correlation_id).await {
            Ok(sent) => {
                tracker.mark_sent(&request.delivery_id, attempt).await;
                info!(
                    delivery_id = %request.delivery_id,
                    recipient = %request.recipient,
                    workflow = %workflow_key,
                    attempt,
                    "Email processed successfully"
                );

                Ok(DeliveryOutcome {
                    delivery_id: request.delivery_id,
                    correlation_id: correlation_id.to_string(),
                    workflow,
                    sent,
                })
            }
            Err(e) => {
                self.record_failure(&request, attempt, correlation_id, &e).await;
                Err(e)
            }
        }
    }

    async fn deliver(
        &self,
        request: &DeliveryRequest,
        workflow: WorkflowKind,
        correlation_id: &str,
    ) -> DeliveryResult<SentEmail> {
        let prepared = self
            .context
            .workflows
            .prepare_email(workflow, &request.payload, &request.attachments, correlation_id)
            .await?;

        let subject = request
            .subject
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or(prepared.subject);

        let outbound = OutboundEmail {
            delivery_id: request.delivery_id.clone(),
            recipient: request.recipient.clone(),
            subject,
            html: prepared.html,
            text: prepared.text,
            headers: request.headers.clone(),
            attachments: prepared.attachments,
        };

        self.context.provider.send(outbound, correlation_id).await
    }

    /// Non-retryable errors are dead-lettered. Retryable ones are `retrying` while the
    /// queue still has attempts left, `failed` after that.
    async fn record_failure(&self, request: &DeliveryRequest, attempt: u32, correlation_id: &str, err: &DeliveryError) {
        let tracker = &self.context.tracker;

        if !err.is_retryable() {
            tracker
                .mark_dead_letter(
                    &request.delivery_id,
                    attempt,
                    err,
                    Some(json!({
                        "error_code": err.code(),
                        "correlation_id": correlation_id,
                    })),
                )
                .await;
        } else if attempt < self.context.event_max_attempts {
            tracker.mark_retrying(&request.delivery_id, attempt, err).await;
        } else {
            tracker.mark_failed(&request.delivery_id, attempt, err).await;
        }
    }
}
