//! Environment-driven configuration for the email delivery pipeline.

use crate::providers::SmtpSettings;
use crate::workflows::{AttachmentFetchPolicy, AttachmentLimits};
use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parse_or, env_required};
use resilience::RetryConfig;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_STORAGE_BASE_URL: &str = "https://storage.googleapis.com";

/// Local SMTP catchers (Mailpit/MailHog) listen here without TLS.
const LOCAL_SMTP_PORT: u16 = 1025;

/// Everything the worker needs to build its [`ServiceContext`](crate::ServiceContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailServiceConfig {
    pub mail_from: String,
    pub mail_from_name: Option<String>,

    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_use_tls: bool,

    pub max_attachment_size_bytes: u64,
    pub max_total_email_size_bytes: u64,

    pub smtp_send_timeout_ms: u64,
    pub smtp_connection_timeout_ms: u64,
    pub smtp_socket_timeout_ms: u64,
    pub smtp_max_retries: u32,
    pub smtp_retry_base_delay_ms: u64,
    pub smtp_retry_max_delay_ms: u64,

    pub attachment_download_timeout_ms: u64,
    pub attachment_max_retries: u32,
    pub attachment_retry_base_delay_ms: u64,
    pub attachment_retry_max_delay_ms: u64,

    /// Redelivery budget of the invoking queue. Only decides `retrying` vs `failed`.
    pub event_max_attempts: u32,

    pub storage_base_url: String,
    pub storage_access_token: Option<String>,

    /// Status tracking is disabled when unset.
    pub status_database_url: Option<String>,
}

impl EmailServiceConfig {
    /// Defaults for everything, pointing at `smtp_host`. Used by tests and local tooling.
    pub fn for_host(smtp_host: impl Into<String>) -> Self {
        Self {
            mail_from: "no-reply@localhost".to_string(),
            mail_from_name: None,
            smtp_host: smtp_host.into(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_use_tls: true,
            max_attachment_size_bytes: 25 * 1024 * 1024,
            max_total_email_size_bytes: 50 * 1024 * 1024,
            smtp_send_timeout_ms: 10_000,
            smtp_connection_timeout_ms: 5_000,
            smtp_socket_timeout_ms: 8_000,
            smtp_max_retries: 3,
            smtp_retry_base_delay_ms: 250,
            smtp_retry_max_delay_ms: 2_000,
            attachment_download_timeout_ms: 5_000,
            attachment_max_retries: 3,
            attachment_retry_base_delay_ms: 200,
            attachment_retry_max_delay_ms: 1_500,
            event_max_attempts: 5,
            storage_base_url: DEFAULT_STORAGE_BASE_URL.to_string(),
            storage_access_token: None,
            status_database_url: None,
        }
    }

    pub fn attachment_limits(&self) -> AttachmentLimits {
        AttachmentLimits {
            max_attachment_size_bytes: self.max_attachment_size_bytes,
            max_total_email_size_bytes: self.max_total_email_size_bytes,
        }
    }

    pub fn attachment_fetch_policy(&self) -> AttachmentFetchPolicy {
        AttachmentFetchPolicy {
            timeout: Duration::from_millis(self.attachment_download_timeout_ms),
            retry: RetryConfig::from_millis(
                self.attachment_max_retries,
                self.attachment_retry_base_delay_ms,
                self.attachment_retry_max_delay_ms,
            ),
        }
    }

    pub fn smtp_retry(&self) -> RetryConfig {
        RetryConfig::from_millis(
            self.smtp_max_retries,
            self.smtp_retry_base_delay_ms,
            self.smtp_retry_max_delay_ms,
        )
    }

    pub fn smtp_send_timeout(&self) -> Duration {
        Duration::from_millis(self.smtp_send_timeout_ms)
    }

    pub fn smtp_settings(&self) -> SmtpSettings {
        let mut settings = SmtpSettings::new(self.smtp_host.clone(), self.smtp_port).with_tls(self.smtp_use_tls);
        if let (Some(username), Some(password)) = (&self.smtp_username, &self.smtp_password) {
            settings = settings.with_credentials(username.clone(), password.clone());
        }

        settings.connection_timeout = Duration::from_millis(self.smtp_connection_timeout_ms);
        settings.socket_timeout = Duration::from_millis(self.smtp_socket_timeout_ms);
        settings
    }
}

impl FromEnv for EmailServiceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::for_host(String::new());

        let smtp_host = env_required("SMTP_HOST")?;
        let smtp_port = positive("SMTP_PORT", defaults.smtp_port)?;

        let smtp_username = env_optional("SMTP_USERNAME");
        let smtp_password = env_optional("SMTP_PASSWORD");
        if smtp_username.is_some() != smtp_password.is_some() {
            return Err(ConfigError::ParseError {
                key: "SMTP_USERNAME".to_string(),
                details: "SMTP_USERNAME and SMTP_PASSWORD must be set together".to_string(),
            });
        }

        let smtp_use_tls = match env_optional("SMTP_USE_TLS") {
            Some(raw) => parse_bool("SMTP_USE_TLS", &raw)?,
            None => smtp_port != LOCAL_SMTP_PORT,
        };

        Ok(Self {
            mail_from: env_or_default("MAIL_FROM", &defaults.mail_from),
            mail_from_name: env_optional("MAIL_FROM_NAME"),
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            smtp_use_tls,
            max_attachment_size_bytes: positive("MAX_ATTACHMENT_SIZE_BYTES", defaults.max_attachment_size_bytes)?,
            max_total_email_size_bytes: positive("MAX_TOTAL_EMAIL_SIZE_BYTES", defaults.max_total_email_size_bytes)?,
            smtp_send_timeout_ms: positive("SMTP_SEND_TIMEOUT_MS", defaults.smtp_send_timeout_ms)?,
            smtp_connection_timeout_ms: positive("SMTP_CONNECTION_TIMEOUT_MS", defaults.smtp_connection_timeout_ms)?,
            smtp_socket_timeout_ms: positive("SMTP_SOCKET_TIMEOUT_MS", defaults.smtp_socket_timeout_ms)?,
            smtp_max_retries: positive("SMTP_MAX_RETRIES", defaults.smtp_max_retries)?,
            smtp_retry_base_delay_ms: positive("SMTP_RETRY_BASE_DELAY_MS", defaults.smtp_retry_base_delay_ms)?,
            smtp_retry_max_delay_ms: positive("SMTP_RETRY_MAX_DELAY_MS", defaults.smtp_retry_max_delay_ms)?,
            attachment_download_timeout_ms: positive(
                "ATTACHMENT_DOWNLOAD_TIMEOUT_MS",
                defaults.attachment_download_timeout_ms,
            )?,
            attachment_max_retries: positive("ATTACHMENT_MAX_RETRIES", defaults.attachment_max_retries)?,
            attachment_retry_base_delay_ms: positive(
                "ATTACHMENT_RETRY_BASE_DELAY_MS",
                defaults.attachment_retry_base_delay_ms,
            )?,
            attachment_retry_max_delay_ms: positive(
                "ATTACHMENT_RETRY_MAX_DELAY_MS",
                defaults.attachment_retry_max_delay_ms,
            )?,
            event_max_attempts: positive("EMAIL_EVENT_MAX_ATTEMPTS", defaults.event_max_attempts)?,
            storage_base_url: env_or_default("STORAGE_BASE_URL", DEFAULT_STORAGE_BASE_URL),
            storage_access_token: env_optional("STORAGE_ACCESS_TOKEN"),
            status_database_url: env_optional("DELIVERY_STATUS_DATABASE_URL"),
        })
    }
}

/// Parse a strictly positive number.
fn positive<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let value = env_parse_or(key, default)?;
    if value == T::default() {
        return Err(ConfigError::ParseError {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::ParseError {
            key: key.to_string(),
            details: format!("expected a boolean, got '{}'", other),
        }),
    }
}
