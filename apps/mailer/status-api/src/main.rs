//! Delivery Status API - Entry Point

#[tokio::main]
async fn main() -> eyre::Result<()> {
    mailer_status_api::run().await
}
