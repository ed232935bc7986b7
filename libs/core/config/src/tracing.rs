use crate::{Environment, env_flag, env_optional};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, prelude::*};

/// Install color-eyre with a project-standard configuration.
///
/// Call this early in main() before any fallible operations. Safe to call multiple times.
pub fn install_color_eyre() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_location_section(true)
        .display_env_section(false)
        .install();
}

/// Resolve the default filter directive when `RUST_LOG` is not set.
///
/// `LOG_LEVEL` wins when present, then `ENABLE_DEBUG_LOGS` switches to `debug`,
/// otherwise `info`.
pub fn default_directive() -> String {
    if let Some(level) = env_optional("LOG_LEVEL") {
        return level.to_ascii_lowercase();
    }

    if env_flag("ENABLE_DEBUG_LOGS", false) {
        "debug".to_string()
    } else {
        "info".to_string()
    }
}

/// Initialize tracing with environment-aware configuration and error span capture.
///
/// - **Production** (`APP_ENV=production`): flattened JSON events, one per line, for log
///   aggregation. Every event carries the `service` name through the root span.
/// - **Development** (default): pretty, human readable output.
///
/// Both variants include the [`tracing_error::ErrorLayer`] so `eyre` reports carry span traces.
///
/// Filter precedence: `RUST_LOG`, then `LOG_LEVEL`, then `ENABLE_DEBUG_LOGS`, then `info`.
///
/// Safe to call multiple times; later calls are no-ops (common in tests).
pub fn init_tracing(environment: &Environment, service: &str) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_directive()).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let result = if is_production {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .pretty(),
            )
            .with(tracing_error::ErrorLayer::default())
            .with(filter)
            .try_init()
    };

    match result {
        Ok(_) => {
            info!(service, environment = ?environment, "Tracing initialized");
        }
        Err(_) => {
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}
