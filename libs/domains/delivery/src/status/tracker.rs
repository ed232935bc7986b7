//! Best-effort delivery status tracking.
//!
//! Every transition is a single unconditional write (last write wins). Failures are
//! logged and swallowed. A missing schema disables the tracker for the rest of the
//! process.

use super::store::{DeliveryStore, ErrorDetails, NewDelivery, StatusUpdate, StoreError};
use crate::error::DeliveryError;
use crate::models::DeliveryStatus;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

pub struct StatusTracker {
    store: Option<Arc<dyn DeliveryStore>>,
    disabled: AtomicBool,
    schema_missing_notified: AtomicBool,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        info!("Email status tracking enabled");
        Self {
            store: Some(store),
            disabled: AtomicBool::new(false),
            schema_missing_notified: AtomicBool::new(false),
        }
    }

    /// Tracker without a store. Every call is a no-op.
    pub fn disabled() -> Self {
        info!("Email status tracking disabled (no database connection configured)");
        Self {
            store: None,
            disabled: AtomicBool::new(true),
            schema_missing_notified: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some() && !self.disabled.load(Ordering::Acquire)
    }

    pub async fn record_queued(&self, delivery_id: &str, workflow: &str, recipient: &str, metadata: Option<Value>) {
        let Some(store) = self.active_store() else { return };

        let delivery = NewDelivery {
            delivery_id: delivery_id.to_string(),
            workflow: workflow.to_string(),
            recipient: recipient.to_string(),
            metadata,
        };

        if let Err(e) = store.insert_queued(&delivery).await {
            self.handle_error(e, "record_queued", delivery_id);
        }
    }

    pub async fn mark_in_progress(&self, delivery_id: &str, attempt: u32) {
        self.apply(StatusUpdate::new(delivery_id, DeliveryStatus::InProgress, clamp_attempt(attempt)), "mark_in_progress")
            .await;
    }

    pub async fn mark_retrying(&self, delivery_id: &str, attempt: u32, error: &DeliveryError) {
        let update = StatusUpdate::new(delivery_id, DeliveryStatus::Retrying, clamp_attempt(attempt))
            .with_error(ErrorDetails::from(error));
        self.apply(update, "mark_retrying").await;
    }

    pub async fn mark_sent(&self, delivery_id: &str, attempt: u32) {
        let update = StatusUpdate::new(delivery_id, DeliveryStatus::Sent, clamp_attempt(attempt)).stamping_sent();
        self.apply(update, "mark_sent").await;
    }

    pub async fn mark_failed(&self, delivery_id: &str, attempt: u32, error: &DeliveryError) {
        let update = StatusUpdate::new(delivery_id, DeliveryStatus::Failed, clamp_attempt(attempt))
            .with_error(ErrorDetails::from(error));
        self.apply(update, "mark_failed").await;
    }

    pub async fn mark_dead_letter(
        &self,
        delivery_id: &str,
        attempt: u32,
        error: &DeliveryError,
        metadata: Option<Value>,
    ) {
        let update = StatusUpdate::new(delivery_id, DeliveryStatus::DeadLetter, clamp_attempt(attempt))
            .with_error(ErrorDetails::from(error))
            .with_metadata(metadata);
        self.apply(update, "mark_dead_letter").await;
    }

    fn active_store(&self) -> Option<&Arc<dyn DeliveryStore>> {
        if self.disabled.load(Ordering::Acquire) {
            return None;
        }
        self.store.as_ref()
    }

    async fn apply(&self, update: StatusUpdate, action: &'static str) {
        let Some(store) = self.active_store() else { return };

        if let Err(e) = store.apply_update(&update).await {
            self.handle_error(e, action, &update.delivery_id);
        }
    }

    fn handle_error(&self, err: StoreError, action: &'static str, delivery_id: &str) {
        match err {
            StoreError::SchemaUnavailable(message) => {
                if !self.schema_missing_notified.swap(true, Ordering::AcqRel) {
                    warn!(error = %message, "Email status schema unavailable (likely migration pending)");
                }
                if !self.disabled.swap(true, Ordering::AcqRel) {
                    warn!(reason = "schema_unavailable", "Disabling email status tracking");
                }
            }
            StoreError::Query(message) => {
                error!(action, delivery_id, error = %message, "Failed to persist email delivery status");
            }
        }
    }
}

fn clamp_attempt(attempt: u32) -> i32 {
    i32::try_from(attempt.max(1)).unwrap_or(i32::MAX)
}
