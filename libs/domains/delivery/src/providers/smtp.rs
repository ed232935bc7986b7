//! SMTP transport implementation using lettre.
//!
//! Local development servers (Mailpit/MailHog) run without TLS or credentials; production
//! relays use STARTTLS, or implicit TLS on port 465.

use super::{MailTransport, OutboundEmail, SentEmail, TransportError};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Attachment as MailAttachment, Mailbox, MultiPart, SinglePart,
        header::{ContentType, HeaderName, HeaderValue},
    },
    transport::smtp::authentication::Credentials,
};
use std::time::Duration;
use tracing::{debug, warn};

/// SMTP connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Optional for dev servers like Mailpit.
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    /// Bounds the startup connectivity check.
    pub connection_timeout: Duration,
    /// Per-command socket timeout.
    pub socket_timeout: Duration,
}

impl SmtpSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            use_tls: port != 1025,
            connection_timeout: Duration::from_millis(5_000),
            socket_timeout: Duration::from_millis(8_000),
        }
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

/// lettre-backed [`MailTransport`].
pub struct LettreTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    settings: SmtpSettings,
}

impl LettreTransport {
    pub fn new(settings: SmtpSettings, from_email: &str, from_name: Option<&str>) -> Result<Self, TransportError> {
        let from = build_from_mailbox(from_email, from_name)?;
        let transport = Self::build_transport(&settings)?;

        Ok(Self {
            transport,
            from,
            settings,
        })
    }

    fn build_transport(settings: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let mut builder = if settings.use_tls && settings.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| TransportError::with_code("ETLS", format!("Failed to create SMTP relay: {}", e)))?
        } else if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| TransportError::with_code("ETLS", format!("Failed to create SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        builder = builder
            .port(settings.port)
            .timeout(Some(settings.socket_timeout));

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    /// Check the server is reachable within the connection timeout.
    pub async fn verify(&self) -> Result<(), TransportError> {
        match tokio::time::timeout(self.settings.connection_timeout, self.transport.test_connection()).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(TransportError::with_code(
                "ECONNECTION",
                format!("SMTP server {} rejected the connection test", self.settings.host),
            )),
            Ok(Err(e)) => Err(map_smtp_error(&e)),
            Err(_) => Err(TransportError::with_code(
                "ETIMEDOUT",
                format!(
                    "SMTP connection to {}:{} timed out after {}ms",
                    self.settings.host,
                    self.settings.port,
                    self.settings.connection_timeout.as_millis()
                ),
            )),
        }
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, TransportError> {
        let to: Mailbox = email
            .recipient
            .parse()
            .map_err(|e| envelope_error(format!("Invalid recipient address: {}", e)))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&email.subject);

        for (name, value) in &email.headers {
            let header_name = HeaderName::new_from_ascii(name.clone())
                .map_err(|e| envelope_error(format!("Invalid header name '{}': {}", name, e)))?;
            builder = builder.raw_header(HeaderValue::new(header_name, value.clone()));
        }

        let body = MultiPart::alternative()
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_PLAIN)
                    .body(email.text.clone()),
            )
            .singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(email.html.clone()),
            );

        let message = if email.attachments.is_empty() {
            builder.multipart(body)
        } else {
            let mut mixed = MultiPart::mixed().multipart(body);
            for attachment in &email.attachments {
                let content_type = ContentType::parse(&attachment.content_type)
                    .unwrap_or_else(|_| ContentType::parse("application/octet-stream").unwrap_or(ContentType::TEXT_PLAIN));
                mixed = mixed.singlepart(
                    MailAttachment::new(attachment.filename.clone()).body(attachment.content.clone(), content_type),
                );
            }
            builder.multipart(mixed)
        }
        .map_err(|e| envelope_error(format!("Failed to build email message: {}", e)))?;

        Ok(message)
    }
}

#[async_trait]
impl MailTransport for LettreTransport {
    async fn transmit(&self, email: &OutboundEmail) -> Result<SentEmail, TransportError> {
        debug!(
            delivery_id = %email.delivery_id,
            to = %email.recipient,
            host = %self.settings.host,
            port = %self.settings.port,
            attachments = email.attachments.len(),
            "Sending email via SMTP"
        );

        let message = self.build_message(email)?;

        let response = self.transport.send(message).await.map_err(|e| {
            warn!(delivery_id = %email.delivery_id, error = %e, "SMTP transmit failed");
            map_smtp_error(&e)
        })?;

        let lines: Vec<String> = response.message().map(str::to_string).collect();

        Ok(SentEmail {
            message_id: lines.first().cloned(),
            response: Some(format!("{} {}", response.code(), lines.join(" "))),
        })
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

fn build_from_mailbox(from_email: &str, from_name: Option<&str>) -> Result<Mailbox, TransportError> {
    let address = from_email
        .parse()
        .map_err(|e| envelope_error(format!("Invalid from address '{}': {}", from_email, e)))?;

    Ok(Mailbox::new(from_name.map(str::to_string), address))
}

fn envelope_error(message: String) -> TransportError {
    TransportError::with_code("EENVELOPE", message)
}

/// Map a lettre SMTP error onto transport codes/status.
fn map_smtp_error(err: &lettre::transport::smtp::Error) -> TransportError {
    let message = err.to_string();

    if err.is_timeout() {
        return TransportError::with_code("ETIMEDOUT", message);
    }

    if let Some(status) = err.status().and_then(|code| code.to_string().parse::<u16>().ok()) {
        return TransportError::with_status(status, message);
    }

    if err.is_tls() {
        return TransportError::with_code("ETLS", message);
    }

    TransportError::with_code("ECONNECTION", message)
}
