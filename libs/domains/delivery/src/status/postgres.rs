//! Postgres-backed [`DeliveryStore`] over `email.deliveries`.

use super::store::{DeliveryStore, NewDelivery, StatusUpdate, StoreError, StoreResult};
use crate::models::{DeliveryRecord, DeliveryStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, FromQueryResult, Statement,
};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const SELECT_COLUMNS: &str = r#"
    SELECT delivery_id, workflow, recipient, status, attempts,
           last_error_code, last_error_message,
           queued_at, last_attempted_at, sent_at,
           created_at, updated_at, metadata
      FROM email.deliveries
"#;

/// Open a small, lazily connected pool.
///
/// The workload is bursty but low-rate, so two connections are plenty.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url);
    opt.max_connections(2)
        .min_connections(0)
        .connect_timeout(Duration::from_secs(5))
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(true)
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    info!("Delivery status database pool ready");

    Ok(db)
}

#[derive(Debug, FromQueryResult)]
struct DeliveryRow {
    delivery_id: String,
    workflow: String,
    recipient: String,
    status: String,
    attempts: i32,
    last_error_code: Option<String>,
    last_error_message: Option<String>,
    queued_at: Option<DateTime<Utc>>,
    last_attempted_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: Option<Value>,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let status = DeliveryStatus::from_str(&row.status)
            .map_err(|_| StoreError::Query(format!("Unknown delivery status '{}'", row.status)))?;

        Ok(Self {
            delivery_id: row.delivery_id,
            workflow: row.workflow,
            recipient: row.recipient,
            status,
            attempts: row.attempts,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
            queued_at: row.queued_at,
            last_attempted_at: row.last_attempted_at,
            sent_at: row.sent_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            metadata: row.metadata,
        })
    }
}

#[derive(Clone)]
pub struct PgDeliveryStore {
    db: DatabaseConnection,
}

impl PgDeliveryStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn fetch_all(&self, stmt: Statement) -> StoreResult<Vec<DeliveryRecord>> {
        DeliveryRow::find_by_statement(stmt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(DeliveryRecord::try_from)
            .collect()
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn insert_queued(&self, delivery: &NewDelivery) -> StoreResult<()> {
        let sql = r#"
            INSERT INTO email.deliveries (delivery_id, workflow, recipient, status, attempts, queued_at, metadata)
            VALUES ($1, $2, $3, 'queued', 0, now(), $4::jsonb)
            ON CONFLICT (delivery_id) DO NOTHING
        "#;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                delivery.delivery_id.clone().into(),
                delivery.workflow.clone().into(),
                delivery.recipient.clone().into(),
                delivery.metadata.clone().into(),
            ],
        );

        let result = self.db.execute_raw(stmt).await?;
        debug!(
            delivery_id = %delivery.delivery_id,
            inserted = result.rows_affected() > 0,
            "Recorded queued delivery"
        );

        Ok(())
    }

    async fn apply_update(&self, update: &StatusUpdate) -> StoreResult<()> {
        let sql = r#"
            UPDATE email.deliveries
               SET status = $2,
                   attempts = GREATEST(COALESCE(attempts, 0), $3),
                   last_attempted_at = now(),
                   last_error_code = $4,
                   last_error_message = $5,
                   sent_at = CASE WHEN $6::boolean THEN COALESCE(sent_at, now()) ELSE sent_at END,
                   metadata = CASE
                       WHEN $7::jsonb IS NULL THEN metadata
                       ELSE COALESCE(metadata, '{}'::jsonb) || $7::jsonb
                   END,
                   updated_at = now()
             WHERE delivery_id = $1
        "#;

        let (code, message) = match &update.error {
            Some(details) => (Some(details.code.clone()), Some(details.message.clone())),
            None => (None, None),
        };

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [
                update.delivery_id.clone().into(),
                update.status.to_string().into(),
                update.attempt.into(),
                code.into(),
                message.into(),
                update.stamp_sent.into(),
                update.metadata.clone().into(),
            ],
        );

        self.db.execute_raw(stmt).await?;
        Ok(())
    }

    async fn find_by_id(&self, delivery_id: &str) -> StoreResult<Option<DeliveryRecord>> {
        let sql = format!("{} WHERE delivery_id = $1", SELECT_COLUMNS);
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [delivery_id.into()]);

        DeliveryRow::find_by_statement(stmt)
            .one(&self.db)
            .await?
            .map(DeliveryRecord::try_from)
            .transpose()
    }

    async fn list_recent(&self, limit: u64) -> StoreResult<Vec<DeliveryRecord>> {
        let sql = format!("{} ORDER BY updated_at DESC LIMIT $1", SELECT_COLUMNS);
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, [(limit as i64).into()]);

        self.fetch_all(stmt).await
    }

    async fn list_by_recipient(&self, recipient: &str, limit: u64) -> StoreResult<Vec<DeliveryRecord>> {
        let sql = format!(
            "{} WHERE recipient = $1 ORDER BY updated_at DESC LIMIT $2",
            SELECT_COLUMNS
        );
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [recipient.into(), (limit as i64).into()],
        );

        self.fetch_all(stmt).await
    }
}
