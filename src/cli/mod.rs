//! Command-line interface
//!
//! Subcommands:
//! - `backfill`: register the universe and run a full historical backfill
//! - `serve`: backfill, then run the real-time distributor with periodic
//!   maintenance until interrupted
//! - `maintain`: run one maintenance pass

pub mod backfill;
pub mod maintain;
pub mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::config::Settings;
use crate::distributor::{DistributorConfig, RealtimeDistributor};
use crate::fetch::{FetchPolicy, RateLimitedFetcher};
use crate::orchestrator::IngestionOrchestrator;
use crate::provider::alpaca::{RestClient, StreamClient};
use crate::storage::BarStore;

#[derive(Parser)]
#[command(name = "market-ingest", about = "Market data ingestion service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch the historical lookback window for every instrument
    Backfill(backfill::BackfillArgs),
    /// Run the ingestion service (backfill + live distribution + maintenance)
    Serve(serve::ServeArgs),
    /// Run one retention/integrity maintenance pass
    Maintain(maintain::MaintainArgs),
}

/// Build the production orchestrator from settings.
pub async fn build_orchestrator(
    settings: Settings,
) -> Result<IngestionOrchestrator<RestClient>> {
    let store = Arc::new(BarStore::from_settings(&settings.database).await?);

    let source = RestClient::new(&settings.api, &settings.fetch)?;
    let fetcher = RateLimitedFetcher::new(source, FetchPolicy::from_settings(&settings.fetch));

    let feed = Arc::new(StreamClient::new(&settings.api));
    let distributor = RealtimeDistributor::new(
        store.clone(),
        feed,
        DistributorConfig::from_settings(&settings.bus, &settings.stream),
    );

    Ok(IngestionOrchestrator::new(
        settings,
        store,
        fetcher,
        distributor,
    ))
}
