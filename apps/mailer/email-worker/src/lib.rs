//! Email Worker Service
//!
//! Reads queued email events from stdin and runs each through the delivery pipeline.
//!
//! ## Architecture
//!
//! ```text
//! stdin (one JSON envelope per line)
//!   ↓ { "data": base64(event), "event_id"?, "attempt"? }
//! EmailEventHandler
//!   ↓ (renders templates, fetches attachments)
//! EmailWorkflows
//!   ↓ (sends emails)
//! TransportProvider (SMTP)
//!   ↓
//! StatusTracker (email.deliveries)
//! ```
//!
//! The process stops at end of input or on SIGINT/SIGTERM.

use core_config::{Environment, FromEnv};
use domain_delivery::{EmailEventHandler, EmailServiceConfig, Envelope, EventContext, ServiceContext};
use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "email-worker";

/// One line of worker input.
#[derive(Debug, Deserialize)]
struct QueuedMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    attempt: Option<u32>,
}

/// Parse one input line into the envelope and its invocation context.
pub fn parse_line(line: &str) -> Result<(Envelope, EventContext)> {
    let message: QueuedMessage = serde_json::from_str(line).wrap_err("Input line is not a JSON envelope")?;

    let context = EventContext::new(message.event_id, message.attempt.unwrap_or(1).max(1));
    Ok((Envelope { data: message.data }, context))
}

/// Counters reported when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Feed every line of `input` to the handler until EOF.
pub async fn process_lines<R>(input: R, handler: &EmailEventHandler) -> Result<WorkerStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = WorkerStats::default();
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.wrap_err("Failed to read worker input")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (envelope, context) = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Skipping malformed input line");
                stats.skipped += 1;
                continue;
            }
        };

        stats.processed += 1;
        match handler.handle(&envelope, context).await {
            Ok(outcome) => {
                stats.succeeded += 1;
                info!(
                    delivery_id = %outcome.delivery_id,
                    correlation_id = %outcome.correlation_id,
                    "Event handled"
                );
            }
            Err(e) => {
                // The handler already logged the failure with its delivery and correlation ids.
                stats.failed += 1;
                debug!(error_code = %e.code(), retryable = e.is_retryable(), "Event failed");
            }
        }
    }

    Ok(stats)
}

/// Run the email worker
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev)
/// 2. Loads configuration and builds the service context once
/// 3. Processes stdin until EOF or a shutdown signal
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment, SERVICE_NAME);

    info!(version = env!("CARGO_PKG_VERSION"), environment = ?environment, "Starting email worker service");

    let config = EmailServiceConfig::from_env().wrap_err("Failed to load email service configuration")?;
    let context = ServiceContext::from_config(&config)
        .await
        .wrap_err("Failed to build email service context")?;
    let handler = EmailEventHandler::new(Arc::new(context));

    let input = BufReader::new(tokio::io::stdin());

    tokio::select! {
        result = process_lines(input, &handler) => {
            let stats = result?;
            info!(
                processed = stats.processed,
                succeeded = stats.succeeded,
                failed = stats.failed,
                skipped = stats.skipped,
                "Input exhausted"
            );
        }
        result = shutdown_signal() => {
            if let Err(e) = result {
                error!(error = %e, "Error waiting for shutdown signal");
            }
        }
    }

    info!("Email worker service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
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

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_context() {
        let (envelope, context) = parse_line(r#"{"data":"e30=","event_id":"evt-9","attempt":3}"#).unwrap();

        assert_eq!(envelope.data.as_deref(), Some("e30="));
        assert_eq!(context, EventContext::new(Some("evt-9".into()), 3));
    }

    #[test]
    fn test_parse_line_defaults() {
        let (envelope, context) = parse_line(r#"{"data":"e30="}"#).unwrap();

        assert_eq!(envelope.data.as_deref(), Some("e30="));
        assert_eq!(context, EventContext::default());
    }

    #[test]
    fn test_attempt_zero_is_first_attempt() {
        let (_, context) = parse_line(r#"{"data":"e30=","attempt":0}"#).unwrap();
        assert_eq!(context.attempt, 1);
    }

    #[test]
    fn test_missing_data_is_left_to_the_handler() {
        let (envelope, _) = parse_line("{}").unwrap();
        assert_eq!(envelope.data, None);
    }

    #[test]
    fn test_non_json_line_is_rejected() {
        assert!(parse_line("not json").is_err());
    }
}
