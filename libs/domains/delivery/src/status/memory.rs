use super::store::{DeliveryStore, NewDelivery, StatusUpdate, StoreResult};
use crate::models::{DeliveryRecord, DeliveryStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    records: HashMap<String, (u64, DeliveryRecord)>,
    sequence: u64,
}

impl State {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Newest first. Equal timestamps fall back to write order.
    fn sorted<'a>(&'a self, filter: impl Fn(&DeliveryRecord) -> bool) -> Vec<&'a (u64, DeliveryRecord)> {
        let mut rows: Vec<_> = self.records.values().filter(|(_, r)| filter(r)).collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| b.updated_at.cmp(&a.updated_at).then(seq_b.cmp(seq_a)));
        rows
    }
}

/// [`DeliveryStore`] kept in process memory.
#[derive(Default)]
pub struct InMemoryDeliveryStore {
    state: RwLock<State>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn insert_queued(&self, delivery: &NewDelivery) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&delivery.delivery_id) {
            return Ok(());
        }

        let now = Utc::now();
        let record = DeliveryRecord {
            delivery_id: delivery.delivery_id.clone(),
            workflow: delivery.workflow.clone(),
            recipient: delivery.recipient.clone(),
            status: DeliveryStatus::Queued,
            attempts: 0,
            last_error_code: None,
            last_error_message: None,
            queued_at: Some(now),
            last_attempted_at: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
            metadata: delivery.metadata.clone(),
        };

        let sequence = state.next_sequence();
        state.records.insert(delivery.delivery_id.clone(), (sequence, record));
        Ok(())
    }

    async fn apply_update(&self, update: &StatusUpdate) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let sequence = state.next_sequence();

        let Some((seq, record)) = state.records.get_mut(&update.delivery_id) else {
            return Ok(());
        };

        let now = Utc::now();
        *seq = sequence;
        record.status = update.status;
        record.attempts = record.attempts.max(update.attempt);
        record.last_attempted_at = Some(now);
        record.last_error_code = update.error.as_ref().map(|e| e.code.clone());
        record.last_error_message = update.error.as_ref().map(|e| e.message.clone());
        if update.stamp_sent && record.sent_at.is_none() {
            record.sent_at = Some(now);
        }
        if let Some(metadata) = &update.metadata {
            record.metadata = Some(merge_metadata(record.metadata.take(), metadata));
        }
        record.updated_at = now;

        Ok(())
    }

    async fn find_by_id(&self, delivery_id: &str) -> StoreResult<Option<DeliveryRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(delivery_id).map(|(_, r)| r.clone()))
    }

    async fn list_recent(&self, limit: u64) -> StoreResult<Vec<DeliveryRecord>> {
        let state = self.state.read().await;
        Ok(state
            .sorted(|_| true)
            .into_iter()
            .take(limit as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn list_by_recipient(&self, recipient: &str, limit: u64) -> StoreResult<Vec<DeliveryRecord>> {
        let state = self.state.read().await;
        Ok(state
            .sorted(|r| r.recipient == recipient)
            .into_iter()
            .take(limit as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

/// Top-level object merge, same as jsonb `||`.
fn merge_metadata(existing: Option<Value>, new: &Value) -> Value {
    match (existing, new) {
        (Some(Value::Object(mut current)), Value::Object(incoming)) => {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
            Value::Object(current)
        }
        _ => new.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::store::ErrorDetails;
    use serde_json::json;

    fn queued(id: &str, recipient: &str) -> NewDelivery {
        NewDelivery {
            delivery_id: id.into(),
            workflow: "verification".into(),
            recipient: recipient.into(),
            metadata: Some(json!({ "correlation_id": "email-1" })),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = InMemoryDeliveryStore::new();
        store.insert_queued(&queued("d1", "a@b.com")).await.unwrap();
        store
            .apply_update(&StatusUpdate::new("d1", DeliveryStatus::InProgress, 2))
            .await
            .unwrap();
        store.insert_queued(&queued("d1", "other@b.com")).await.unwrap();

        let record = store.find_by_id("d1").await.unwrap().unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(record.recipient, "a@b.com");
        assert_eq!(record.status, DeliveryStatus::InProgress);
    }

    #[tokio::test]
    async fn test_attempts_never_decrease() {
        let store = InMemoryDeliveryStore::new();
        store.insert_queued(&queued("d1", "a@b.com")).await.unwrap();
        store
            .apply_update(&StatusUpdate::new("d1", DeliveryStatus::InProgress, 3))
            .await
            .unwrap();
        store
            .apply_update(&StatusUpdate::new("d1", DeliveryStatus::Retrying, 1))
            .await
            .unwrap();

        assert_eq!(store.find_by_id("d1").await.unwrap().unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_sent_at_is_stamped_once_and_errors_cleared() {
        let store = InMemoryDeliveryStore::new();
        store.insert_queued(&queued("d1", "a@b.com")).await.unwrap();
        store
            .apply_update(
                &StatusUpdate::new("d1", DeliveryStatus::Failed, 1).with_error(ErrorDetails::new("550", "rejected")),
            )
            .await
            .unwrap();
        store
            .apply_update(&StatusUpdate::new("d1", DeliveryStatus::Sent, 1).stamping_sent())
            .await
            .unwrap();
        let first_sent = store.find_by_id("d1").await.unwrap().unwrap().sent_at;

        store
            .apply_update(&StatusUpdate::new("d1", DeliveryStatus::Sent, 2).stamping_sent())
            .await
            .unwrap();
        let record = store.find_by_id("d1").await.unwrap().unwrap();

        assert_eq!(record.status, DeliveryStatus::Sent);
        assert!(first_sent.is_some());
        assert_eq!(record.sent_at, first_sent);
        assert_eq!(record.last_error_code, None);
        assert_eq!(record.last_error_message, None);
    }

    #[tokio::test]
    async fn test_metadata_merges() {
        let store = InMemoryDeliveryStore::new();
        store.insert_queued(&queued("d1", "a@b.com")).await.unwrap();
        store
            .apply_update(
                &StatusUpdate::new("d1", DeliveryStatus::DeadLetter, 1)
                    .with_metadata(Some(json!({ "error_code": "UNKNOWN_WORKFLOW", "correlation_id": "email-2" }))),
            )
            .await
            .unwrap();

        let metadata = store.find_by_id("d1").await.unwrap().unwrap().metadata.unwrap();
        assert_eq!(metadata, json!({ "error_code": "UNKNOWN_WORKFLOW", "correlation_id": "email-2" }));
    }

    #[tokio::test]
    async fn test_update_of_unknown_id_is_ignored() {
        let store = InMemoryDeliveryStore::new();
        store
            .apply_update(&StatusUpdate::new("missing", DeliveryStatus::Sent, 1))
            .await
            .unwrap();

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_listing_orders_by_most_recent_update() {
        let store = InMemoryDeliveryStore::new();
        store.insert_queued(&queued("d1", "a@b.com")).await.unwrap();
        store.insert_queued(&queued("d2", "c@d.com")).await.unwrap();
        store.insert_queued(&queued("d3", "a@b.com")).await.unwrap();
        store
            .apply_update(&StatusUpdate::new("d1", DeliveryStatus::InProgress, 1))
            .await
            .unwrap();

        let recent: Vec<String> = store
            .list_recent(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.delivery_id)
            .collect();
        assert_eq!(recent, vec!["d1", "d3", "d2"]);

        let for_recipient = store.list_by_recipient("a@b.com", 1).await.unwrap();
        assert_eq!(for_recipient.len(), 1);
        assert_eq!(for_recipient[0].delivery_id, "d1");
    }
}
