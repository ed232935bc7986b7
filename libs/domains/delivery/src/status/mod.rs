//! Delivery status tracking, querying and the read API.

mod api;
mod memory;
mod postgres;
mod service;
mod store;
mod tracker;

pub use api::{ListParams, status_router};
pub use memory::InMemoryDeliveryStore;
pub use postgres::{PgDeliveryStore, connect};
pub use service::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT, StatusQueryService, clamp_limit};
pub use store::{
    DeliveryStore, ErrorDetails, MAX_ERROR_MESSAGE_LEN, NewDelivery, StatusUpdate, StoreError, StoreResult,
    is_schema_missing,
};
pub use tracker::StatusTracker;

#[cfg(test)]
pub use store::MockDeliveryStore;
