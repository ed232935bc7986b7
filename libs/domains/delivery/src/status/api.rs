//! Read-only HTTP API over [`StatusQueryService`].
//!
//! - `GET /deliveries?recipient=&limit=` returns `{ "data": [...] }`
//! - `GET /deliveries/{id}` returns `{ "data": {...} }` or 404 `delivery_not_found`
//!
//! Any other method is 405. When tracking is not configured every GET is 503.

use super::service::StatusQueryService;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

type SharedService = Arc<StatusQueryService>;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub recipient: Option<String>,
    /// Kept as a string so a non-numeric value falls back to the default.
    pub limit: Option<String>,
}

impl ListParams {
    fn limit(&self) -> Option<i64> {
        self.limit.as_deref().and_then(|raw| raw.trim().parse().ok())
    }

    fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}

pub fn status_router(service: SharedService) -> Router {
    Router::new()
        .route("/deliveries", get(list_deliveries).fallback(method_not_allowed))
        .route("/deliveries/", get(list_deliveries).fallback(method_not_allowed))
        .route("/deliveries/{id}", get(get_delivery).fallback(method_not_allowed))
        .fallback(not_found)
        .with_state(service)
}

async fn list_deliveries(State(service): State<SharedService>, Query(params): Query<ListParams>) -> Response {
    if !service.is_enabled() {
        return tracking_disabled();
    }

    let result = match params.recipient() {
        Some(recipient) => service.list_by_recipient(recipient, params.limit()).await,
        None => service.list_recent(params.limit()).await,
    };

    match result {
        Ok(records) => (StatusCode::OK, Json(json!({ "data": records }))).into_response(),
        Err(e) => internal_error(&e),
    }
}

async fn get_delivery(State(service): State<SharedService>, Path(id): Path<String>) -> Response {
    if !service.is_enabled() {
        return tracking_disabled();
    }

    match service.get_by_id(&id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(json!({ "data": record }))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "delivery_not_found"),
        Err(e) => internal_error(&e),
    }
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed")
}

async fn not_found(method: Method, State(service): State<SharedService>) -> Response {
    if method != Method::GET {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed");
    }
    if !service.is_enabled() {
        return tracking_disabled();
    }
    error_response(StatusCode::NOT_FOUND, "not_found")
}

fn tracking_disabled() -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "status_tracking_disabled")
}

fn internal_error(err: &dyn std::fmt::Display) -> Response {
    error!(error = %err, "Status API request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
}

fn error_response(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": code }))).into_response()
}
