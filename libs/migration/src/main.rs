//! Schema migrations for the delivery status store.
//!
//! Reads `DATABASE_URL`, e.g. `cargo run -p migration -- up`.

use migration::Migrator;
use sea_orm_migration::cli;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
