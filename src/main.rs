//! Market ingest CLI
//!
//! Provides commands for:
//! - `backfill`: fetch the historical lookback window for the universe
//! - `serve`: run the ingestion service (backfill, live distribution,
//!   periodic maintenance)
//! - `maintain`: run one maintenance pass

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_ingest::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("market_ingest=info".parse()?))
        .init();

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    match cli.command {
        Commands::Backfill(args) => {
            market_ingest::cli::backfill::execute(args).await?;
        }
        Commands::Serve(args) => {
            market_ingest::cli::serve::execute(args).await?;
        }
        Commands::Maintain(args) => {
            market_ingest::cli::maintain::execute(args).await?;
        }
    }

    Ok(())
}
