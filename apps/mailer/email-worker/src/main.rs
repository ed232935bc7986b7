//! Email Worker Service - Entry Point
//!
//! Background worker that delivers queued email events read from stdin.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    mailer_email_worker::run().await
}
