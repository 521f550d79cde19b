use anyhow::Result;
use car_harvest::cli::{run, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt::init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(_) => tracing::info!("CLI completed successfully"),
        Err(e) => tracing::error!(error = %e, "CLI exited with error"),
    }
    result
}
