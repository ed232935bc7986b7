//! Look up a single delivery record
//!
//! Run with: cargo run -p mailer_status_api --bin delivery_status -- <delivery-id>

use clap::Parser;
use core_config::env_optional;
use eyre::{Result, WrapErr};
use mailer_status_api::build_service;

#[derive(Debug, Parser)]
#[command(name = "delivery_status", about = "Print the status record of one email delivery")]
struct Args {
    /// Delivery id to look up
    delivery_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let service = build_service(env_optional("DELIVERY_STATUS_DATABASE_URL").as_deref()).await;
    if !service.is_enabled() {
        eprintln!("Email status tracking database is not configured. Set DELIVERY_STATUS_DATABASE_URL and retry.");
        std::process::exit(1);
    }

    let record = service
        .get_by_id(&args.delivery_id)
        .await
        .wrap_err("Failed to query delivery status")?;

    match record {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No delivery found for ID: {}", args.delivery_id),
    }

    Ok(())
}
