//! Maintain command - one retention/integrity pass

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::config::Settings;

/// Arguments for the maintain command
#[derive(Args)]
pub struct MaintainArgs {}

/// Execute the maintain command
pub async fn execute(_args: MaintainArgs) -> Result<()> {
    let settings = Settings::load()?;
    let orchestrator = super::build_orchestrator(settings).await?;

    let report = orchestrator.run_maintenance().await?;
    info!(
        deleted = ?report.bars_deleted,
        touched = report.instruments_touched,
        "maintenance pass complete"
    );

    orchestrator.shutdown().await;
    Ok(())
}
