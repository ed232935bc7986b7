//! Print a verification-code test envelope for the worker
//!
//! Run with: cargo run -p mailer_email_worker --bin emit_test_event | cargo run -p mailer_email_worker

use chrono::{Duration, Utc};
use clap::Parser;
use domain_delivery::Envelope;
use eyre::Result;
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "emit_test_event", about = "Emit a verification-code email event on stdout")]
struct Args {
    /// Recipient address
    #[arg(long, default_value = "test@example.com")]
    recipient: String,

    /// Workflow/template key
    #[arg(long, default_value = "verification-code")]
    template: String,

    /// Delivery id, defaults to test-<millis>
    #[arg(long)]
    delivery_id: Option<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let now = Utc::now();
    let delivery_id = args
        .delivery_id
        .unwrap_or_else(|| format!("test-{}", now.timestamp_millis()));

    let event = json!({
        "delivery_id": delivery_id,
        "recipient": args.recipient,
        "template": args.template,
        "payload": {
            "verification_code": "123456",
            "provider": "google",
            "expires_at": (now + Duration::minutes(15)).to_rfc3339(),
        },
        "attachments": [],
    });

    let envelope = Envelope::from_event(&event);
    let line = json!({ "data": envelope.data, "event_id": format!("test-event-{}", now.timestamp_millis()) });

    eprintln!("Recipient: {}", args.recipient);
    eprintln!("Template: {}", args.template);
    eprintln!("Code: 123456");
    println!("{}", line);

    Ok(())
}
