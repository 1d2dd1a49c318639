//! Serve command - run the full ingestion service

use anyhow::Result;
use clap::Args;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::distributor::DistributorState;

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Skip the initial historical backfill
    #[arg(long)]
    pub skip_backfill: bool,

    /// Seconds between maintenance checks
    #[arg(long, default_value_t = 3600)]
    pub maintenance_interval_secs: u64,

    /// Restart the distributor automatically after a feed disconnect
    #[arg(long, default_value_t = true)]
    pub restart_on_disconnect: bool,
}

/// Execute the serve command
pub async fn execute(args: ServeArgs) -> Result<()> {
    let settings = Settings::load()?;
    let orchestrator = super::build_orchestrator(settings).await?;

    let symbols = orchestrator.register_universe().await?;

    if args.skip_backfill {
        info!("skipping initial backfill");
    } else {
        let summary = orchestrator.run_backfill(&symbols).await;
        info!(
            instruments = summary.instruments,
            inserted = summary.bars_inserted,
            failed = summary.failures.len(),
            "initial backfill finished"
        );
        for failure in &summary.failures {
            warn!(
                symbol = %failure.symbol,
                attempts = failure.attempts,
                error = %failure.error,
                "instrument backfill failed"
            );
        }
    }

    let bus_addr = orchestrator.start_streaming(&symbols).await?;
    info!(%bus_addr, "publishing live bars on the internal bus");

    let mut ticker =
        tokio::time::interval(Duration::from_secs(args.maintenance_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match orchestrator.run_maintenance().await {
                    Ok(report) => info!(
                        deleted = ?report.bars_deleted,
                        touched = report.instruments_touched,
                        "maintenance pass complete"
                    ),
                    Err(err) => error!(%err, "maintenance pass failed"),
                }

                // Supervise the distributor: a feed disconnect leaves it
                // stopped with a recorded error.
                if orchestrator.distributor().state() == DistributorState::Stopped {
                    let reason = orchestrator
                        .distributor()
                        .last_error()
                        .unwrap_or_else(|| "unknown".to_string());
                    if args.restart_on_disconnect {
                        warn!(%reason, "distributor stopped; restarting");
                        orchestrator.stop_streaming().await; // clear the finished task
                        if let Err(err) = orchestrator.start_streaming(&symbols).await {
                            error!(%err, "failed to restart distributor");
                        }
                    } else {
                        error!(%reason, "distributor stopped; restart disabled");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
