use super::store::{DeliveryStore, StoreResult};
use crate::models::DeliveryRecord;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DEFAULT_LIST_LIMIT: u64 = 20;
pub const MAX_LIST_LIMIT: u64 = 100;

/// Read-only queries over delivery records.
///
/// A missing schema reads as "no data" rather than an error.
pub struct StatusQueryService {
    store: Option<Arc<dyn DeliveryStore>>,
}

impl StatusQueryService {
    pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
        info!("Email status service enabled");
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        info!("Email status service disabled (no database connection configured)");
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn get_by_id(&self, delivery_id: &str) -> StoreResult<Option<DeliveryRecord>> {
        let Some(store) = &self.store else { return Ok(None) };
        if delivery_id.is_empty() {
            return Ok(None);
        }

        fail_open(store.find_by_id(delivery_id).await)
    }

    pub async fn list_recent(&self, limit: Option<i64>) -> StoreResult<Vec<DeliveryRecord>> {
        let Some(store) = &self.store else { return Ok(Vec::new()) };

        fail_open(store.list_recent(clamp_limit(limit)).await)
    }

    pub async fn list_by_recipient(&self, recipient: &str, limit: Option<i64>) -> StoreResult<Vec<DeliveryRecord>> {
        let Some(store) = &self.store else { return Ok(Vec::new()) };
        if recipient.is_empty() {
            return Ok(Vec::new());
        }

        fail_open(store.list_by_recipient(recipient, clamp_limit(limit)).await)
    }
}

/// Clamp to `[1, 100]`, defaulting to 20.
pub fn clamp_limit(limit: Option<i64>) -> u64 {
    match limit {
        Some(value) => value.clamp(1, MAX_LIST_LIMIT as i64) as u64,
        None => DEFAULT_LIST_LIMIT,
    }
}

fn fail_open<T: Default>(result: StoreResult<T>) -> StoreResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_schema_unavailable() => {
            warn!(error = %e, "Email status schema unavailable - returning empty result");
            Ok(T::default())
        }
        Err(e) => {
            error!(error = %e, "Failed to query email status database");
            Err(e)
        }
    }
}
