//! Delivery Status API
//!
//! Read-only HTTP surface over `email.deliveries`:
//! - `GET /deliveries?recipient=&limit=`
//! - `GET /deliveries/{id}`
//!
//! Starts even without a database; every route then answers 503.

use axum::Router;
use core_config::{ConfigError, Environment, FromEnv, env_optional, env_parse_or};
use domain_delivery::status::connect;
use domain_delivery::{PgDeliveryStore, StatusQueryService, status_router};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

const SERVICE_NAME: &str = "delivery-status-api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusApiConfig {
    pub database_url: Option<String>,
    pub port: u16,
}

impl FromEnv for StatusApiConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env_optional("DELIVERY_STATUS_DATABASE_URL"),
            port: env_parse_or("STATUS_API_PORT", 8080)?,
        })
    }
}

/// Build the query service, falling back to the disabled service when
/// no database is configured or the pool cannot be created.
pub async fn build_service(database_url: Option<&str>) -> StatusQueryService {
    let Some(url) = database_url else {
        warn!("DELIVERY_STATUS_DATABASE_URL not set, status queries are disabled");
        return StatusQueryService::disabled();
    };

    match connect(url).await {
        Ok(db) => StatusQueryService::new(Arc::new(PgDeliveryStore::new(db))),
        Err(e) => {
            warn!(error = %e, "Failed to create status database pool, status queries are disabled");
            StatusQueryService::disabled()
        }
    }
}

pub fn app(service: StatusQueryService) -> Router {
    status_router(Arc::new(service))
}

/// Run the status API until SIGINT/SIGTERM.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment, SERVICE_NAME);

    let config = StatusApiConfig::from_env().wrap_err("Failed to load status API configuration")?;
    let service = build_service(config.database_url.as_deref()).await;
    info!(tracking_enabled = service.is_enabled(), "Delivery status service ready");

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind status API to {}", addr))?;

    info!(port = %config.port, "Status API listening");

    axum::serve(listener, app(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("Status API server failed")?;

    info!("Status API stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
