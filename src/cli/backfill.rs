//! Backfill command

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use crate::config::Settings;

/// Arguments for the backfill command
#[derive(Args)]
pub struct BackfillArgs {
    /// Restrict the backfill to these symbols (comma-separated) instead of
    /// the full universe file
    #[arg(long, short, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
}

/// Execute the backfill command
pub async fn execute(args: BackfillArgs) -> Result<()> {
    let settings = Settings::load()?;
    let orchestrator = super::build_orchestrator(settings).await?;

    let symbols = match args.symbols {
        Some(symbols) => {
            let symbols = normalize_symbols(&symbols);
            for symbol in &symbols {
                orchestrator.store().upsert_instrument(symbol).await?;
            }
            symbols
        }
        None => orchestrator.register_universe().await?,
    };

    let summary = orchestrator.run_backfill(&symbols).await;

    info!(
        instruments = summary.instruments,
        inserted = summary.bars_inserted,
        rejected = summary.bars_rejected,
        "backfill summary"
    );
    for failure in &summary.failures {
        warn!(
            symbol = %failure.symbol,
            attempts = failure.attempts,
            error = %failure.error,
            "instrument backfill failed"
        );
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Normalize CLI-supplied symbols the same way the universe loader does
fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    symbols.iter().map(|s| s.trim().to_ascii_uppercase()).collect()
}
