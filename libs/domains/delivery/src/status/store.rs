//! Durable storage seam for delivery status records.

use crate::error::DeliveryError;
use crate::models::{DeliveryRecord, DeliveryStatus};
use async_trait::async_trait;
use sea_orm::{DbErr, RuntimeErr};
use serde_json::Value;
use thiserror::Error;

/// Postgres SQLSTATEs for an undefined table, schema or type.
const SCHEMA_MISSING_CODES: &[&str] = &["42P01", "3F000", "42704"];

/// Longest error message written to the store.
pub const MAX_ERROR_MESSAGE_LEN: usize = 512;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The `email.deliveries` relation (or its schema/types) does not exist yet.
    #[error("Delivery status schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Delivery status query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_schema_unavailable(&self) -> bool {
        matches!(self, StoreError::SchemaUnavailable(_))
    }
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        let message = err.to_string();
        let missing = match sqlstate(&err) {
            Some(code) => is_schema_missing_code(&code),
            // Mock and custom errors carry no SQLSTATE, only text.
            None => is_schema_missing(&message),
        };

        if missing {
            StoreError::SchemaUnavailable(message)
        } else {
            StoreError::Query(message)
        }
    }
}

/// SQLSTATE reported by the database driver, if the error came from the server.
fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => e
            .as_database_error()
            .and_then(|db_err| db_err.code())
            .map(|code| code.into_owned()),
        _ => None,
    }
}

/// Whether a SQLSTATE is an undefined table, schema or type.
pub fn is_schema_missing_code(code: &str) -> bool {
    SCHEMA_MISSING_CODES.contains(&code)
}

/// Whether a database error message describes a missing relation, schema or type.
///
/// Only used when no SQLSTATE is available; the server's message language is not known.
pub fn is_schema_missing(message: &str) -> bool {
    if SCHEMA_MISSING_CODES.iter().any(|code| message.contains(code)) {
        return true;
    }

    let lower = message.to_ascii_lowercase();
    lower.contains("does not exist")
        && (lower.contains("relation \"") || lower.contains("schema \"") || lower.contains("type \""))
}

/// Row inserted the first time a delivery is seen.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDelivery {
    pub delivery_id: String,
    pub workflow: String,
    pub recipient: String,
    pub metadata: Option<Value>,
}

/// Error code and bounded message recorded on failure transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ErrorDetails {
    pub fn new(code: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self {
            code: code.into(),
            message: truncate_message(message.as_ref()),
        }
    }
}

impl From<&DeliveryError> for ErrorDetails {
    fn from(err: &DeliveryError) -> Self {
        ErrorDetails::new(err.code(), err.to_string())
    }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }

    let kept: String = message.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
    format!("{}...", kept)
}

/// A single status transition.
///
/// `error: None` clears the stored error fields. `attempt` only ever raises the stored
/// counter. `stamp_sent` sets `sent_at` if it is not already set. `metadata` is merged
/// into the stored map, new keys winning.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub attempt: i32,
    pub error: Option<ErrorDetails>,
    pub stamp_sent: bool,
    pub metadata: Option<Value>,
}

impl StatusUpdate {
    pub fn new(delivery_id: impl Into<String>, status: DeliveryStatus, attempt: i32) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            status,
            attempt,
            error: None,
            stamp_sent: false,
            metadata: None,
        }
    }

    pub fn with_error(mut self, error: ErrorDetails) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn stamping_sent(mut self) -> Self {
        self.stamp_sent = true;
        self
    }
}

/// Read/write access to delivery records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Insert a `queued` row unless one already exists for the id.
    async fn insert_queued(&self, delivery: &NewDelivery) -> StoreResult<()>;

    /// Apply a transition. Unknown ids are ignored.
    async fn apply_update(&self, update: &StatusUpdate) -> StoreResult<()>;

    async fn find_by_id(&self, delivery_id: &str) -> StoreResult<Option<DeliveryRecord>>;

    /// Most recently updated first.
    async fn list_recent(&self, limit: u64) -> StoreResult<Vec<DeliveryRecord>>;

    /// Most recently updated first.
    async fn list_by_recipient(&self, recipient: &str, limit: u64) -> StoreResult<Vec<DeliveryRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_missing_detection() {
        assert!(is_schema_missing(
            "Execution Error: error returned from database: relation \"email.deliveries\" does not exist"
        ));
        assert!(is_schema_missing("schema \"email\" does not exist"));
        assert!(is_schema_missing("SQLSTATE 42P01"));
        assert!(!is_schema_missing("connection refused"));
        assert!(!is_schema_missing("column \"foo\" does not exist"));
    }

    #[test]
    fn test_db_err_classification() {
        let missing = StoreError::from(DbErr::Custom("relation \"email.deliveries\" does not exist".into()));
        let other = StoreError::from(DbErr::Custom("deadlock detected".into()));

        assert!(missing.is_schema_unavailable());
        assert!(matches!(other, StoreError::Query(_)));
    }

    mod driver {
        use sea_orm::sqlx::error::{DatabaseError, ErrorKind};
        use sea_orm::{DbErr, RuntimeErr};
        use std::borrow::Cow;
        use std::error::Error as StdError;
        use std::fmt;
        use std::sync::Arc;

        #[derive(Debug)]
        struct ServerError {
            code: &'static str,
            message: &'static str,
        }

        impl fmt::Display for ServerError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.message)
            }
        }

        impl StdError for ServerError {}

        impl DatabaseError for ServerError {
            fn message(&self) -> &str {
                self.message
            }

            fn code(&self) -> Option<Cow<'_, str>> {
                Some(Cow::Borrowed(self.code))
            }

            fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
                self
            }

            fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
                self
            }

            fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
                self
            }

            fn kind(&self) -> ErrorKind {
                ErrorKind::Other
            }
        }

        /// A failed statement as the Postgres driver reports it.
        pub fn exec_error(code: &'static str, message: &'static str) -> DbErr {
            let err = sea_orm::sqlx::Error::Database(Box::new(ServerError { code, message }));
            DbErr::Exec(RuntimeErr::SqlxError(Arc::new(err)))
        }

        pub fn query_error(code: &'static str, message: &'static str) -> DbErr {
            let err = sea_orm::sqlx::Error::Database(Box::new(ServerError { code, message }));
            DbErr::Query(RuntimeErr::SqlxError(Arc::new(err)))
        }
    }

    #[test]
    fn test_sqlstate_wins_over_message_language() {
        let localized = StoreError::from(driver::exec_error("42P01", "Relation »email.deliveries« existiert nicht"));
        let missing_schema = StoreError::from(driver::query_error("3F000", "le schéma « email » n'existe pas"));
        let missing_type = StoreError::from(driver::query_error("42704", "型\"delivery_status\"は存在しません"));

        assert!(localized.is_schema_unavailable());
        assert!(missing_schema.is_schema_unavailable());
        assert!(missing_type.is_schema_unavailable());
    }

    #[test]
    fn test_other_sqlstate_is_a_query_error() {
        let undefined_column = StoreError::from(driver::exec_error("42703", "relation \"x\" does not exist"));
        let deadlock = StoreError::from(driver::exec_error("40P01", "deadlock detected"));

        assert!(matches!(undefined_column, StoreError::Query(_)));
        assert!(matches!(deadlock, StoreError::Query(_)));
    }

    #[test]
    fn test_error_message_is_truncated() {
        let details = ErrorDetails::new("EX", "x".repeat(600));

        assert_eq!(details.message.chars().count(), 512);
        assert!(details.message.ends_with("..."));
        assert_eq!(ErrorDetails::new("EX", "short").message, "short");
        assert_eq!(ErrorDetails::new("EX", "y".repeat(512)).message.len(), 512);
    }

    #[test]
    fn test_details_from_delivery_error() {
        let err = DeliveryError::TotalSizeExceeded { total: 10, limit: 5 };
        let details = ErrorDetails::from(&err);

        assert_eq!(details.code, "EMAIL_TOO_LARGE");
        assert_eq!(details.message, "Email total size exceeds limit (10 bytes > 5)");
    }
}
