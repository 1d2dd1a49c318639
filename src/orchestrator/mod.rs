//! Ingestion orchestration
//!
//! [`IngestionOrchestrator`] owns the instrument universe, drives backfill
//! across all instruments through the rate-limited fetcher, manages the
//! real-time distributor's lifecycle, and runs periodic retention
//! maintenance. Per-instrument backfill failures are isolated: they are
//! recorded in the run summary and do not abort the batch.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::distributor::{RealtimeDistributor, StreamResult};
use crate::fetch::RateLimitedFetcher;
use crate::provider::{BarSource, ProviderError};
use crate::storage::{BarStore, StoreError};
use crate::universe::{load_universe, UniverseError};
use crate::validation::validate_bar;

/// Retention cleanup runs at most once per this period
const CLEANUP_PERIOD_HOURS: i64 = 24;

/// Orchestrator errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OrchestratorError {
    #[error(transparent)]
    Universe(#[from] UniverseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] ProviderError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// One failed instrument in a backfill run
#[derive(Debug, Clone)]
pub struct BackfillFailure {
    pub symbol: String,
    /// Attempts the fetcher was allowed per chunk
    pub attempts: u32,
    pub error: String,
}

/// Outcome of a full backfill pass
#[derive(Debug, Default)]
pub struct BackfillSummary {
    /// Instruments processed (succeeded + failed)
    pub instruments: usize,
    /// Total bars committed across all instruments
    pub bars_inserted: u64,
    /// Bars rejected by validation and skipped
    pub bars_rejected: u64,
    /// Instruments whose backfill failed entirely
    pub failures: Vec<BackfillFailure>,
}

impl BackfillSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of one maintenance pass
#[derive(Debug)]
pub struct MaintenanceReport {
    /// Bars deleted by retention cleanup; `None` when the cleanup was
    /// skipped because it already ran within the last 24 hours
    pub bars_deleted: Option<u64>,
    /// Instruments whose `last_updated_at` was advanced by the integrity pass
    pub instruments_touched: usize,
}

/// Sequences backfill, streaming, and maintenance over the shared store.
pub struct IngestionOrchestrator<S: BarSource> {
    settings: Settings,
    store: Arc<BarStore>,
    fetcher: RateLimitedFetcher<S>,
    distributor: RealtimeDistributor,
    last_cleanup: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl<S: BarSource> IngestionOrchestrator<S> {
    pub fn new(
        settings: Settings,
        store: Arc<BarStore>,
        fetcher: RateLimitedFetcher<S>,
        distributor: RealtimeDistributor,
    ) -> Self {
        Self {
            settings,
            store,
            fetcher,
            distributor,
            last_cleanup: parking_lot::Mutex::new(None),
        }
    }

    /// The managed distributor
    pub fn distributor(&self) -> &RealtimeDistributor {
        &self.distributor
    }

    /// The shared store
    pub fn store(&self) -> &Arc<BarStore> {
        &self.store
    }

    /// Load the instrument universe and register every symbol.
    pub async fn register_universe(&self) -> OrchestratorResult<Vec<String>> {
        let symbols = load_universe(Path::new(&self.settings.universe.tickers_file))?;
        for symbol in &symbols {
            self.store.upsert_instrument(symbol).await?;
        }
        info!(count = symbols.len(), "registered instrument universe");
        Ok(symbols)
    }

    /// Run a full backfill over the given instruments, sequentially.
    ///
    /// A failing instrument is logged, recorded in the summary, and skipped;
    /// the run continues with the next instrument. A small courtesy pause is
    /// applied between instruments in addition to the fetcher's own rate
    /// limiting.
    pub async fn run_backfill(&self, symbols: &[String]) -> BackfillSummary {
        let end = Utc::now();
        let start = end - ChronoDuration::days(365 * self.settings.fetch.lookback_years);
        let pause = Duration::from_millis(self.settings.fetch.instrument_pause_ms);

        let mut summary = BackfillSummary {
            instruments: symbols.len(),
            ..BackfillSummary::default()
        };

        info!(
            instruments = symbols.len(),
            %start,
            %end,
            "starting backfill"
        );

        for symbol in symbols {
            match self.backfill_instrument(symbol, start, end).await {
                Ok((inserted, rejected)) => {
                    summary.bars_inserted += inserted;
                    summary.bars_rejected += rejected;
                    info!(symbol, inserted, "backfill complete for instrument");
                }
                Err(err) => {
                    warn!(symbol, %err, "backfill failed; continuing with next instrument");
                    summary.failures.push(BackfillFailure {
                        symbol: symbol.clone(),
                        attempts: self.settings.fetch.retry_attempts,
                        error: err.to_string(),
                    });
                }
            }

            tokio::time::sleep(pause).await;
        }

        info!(
            inserted = summary.bars_inserted,
            rejected = summary.bars_rejected,
            failed = summary.failures.len(),
            "backfill run finished"
        );
        summary
    }

    /// Backfill one instrument: fetch, validate, bulk-insert, touch.
    ///
    /// Returns (bars inserted, bars rejected by validation).
    async fn backfill_instrument(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> OrchestratorResult<(u64, u64)> {
        let fetched = self.fetcher.fetch_range(symbol, start, end).await?;
        if fetched.is_empty() {
            debug!(symbol, "no historical data in lookback window");
            return Ok((0, 0));
        }

        let total = fetched.len();
        let valid: Vec<_> = fetched
            .into_iter()
            .filter(|bar| match validate_bar(bar) {
                Ok(()) => true,
                Err(err) => {
                    warn!(symbol, timestamp = %bar.timestamp, %err, "skipping invalid bar");
                    false
                }
            })
            .collect();
        let rejected = (total - valid.len()) as u64;

        let inserted = self.store.bulk_insert(&valid).await? as u64;
        self.store.touch_last_updated(symbol).await?;

        Ok((inserted, rejected))
    }

    /// Start the real-time distributor for the given instruments.
    ///
    /// Starting twice is an error surfaced by the distributor itself.
    pub async fn start_streaming(&self, symbols: &[String]) -> StreamResult<SocketAddr> {
        self.distributor.start(symbols).await
    }

    /// Stop the real-time distributor.
    pub async fn stop_streaming(&self) {
        self.distributor.stop().await;
    }

    /// Run one maintenance pass: retention cleanup (at most once per
    /// 24-hour period) and an integrity pass touching `last_updated_at`
    /// for every instrument with stored bars.
    pub async fn run_maintenance(&self) -> OrchestratorResult<MaintenanceReport> {
        let cleanup_due = {
            let last = self.last_cleanup.lock();
            match *last {
                None => true,
                Some(at) => Utc::now() - at >= ChronoDuration::hours(CLEANUP_PERIOD_HOURS),
            }
        };

        let bars_deleted = if cleanup_due {
            let deleted = self
                .store
                .cleanup_older_than(self.settings.storage.retention_days)
                .await?;
            *self.last_cleanup.lock() = Some(Utc::now());
            Some(deleted)
        } else {
            debug!("retention cleanup ran within the last 24h; skipping");
            None
        };

        let mut instruments_touched = 0;
        for symbol in self.store.instruments_with_bars().await? {
            self.store.touch_last_updated(&symbol).await?;
            instruments_touched += 1;
        }

        Ok(MaintenanceReport {
            bars_deleted,
            instruments_touched,
        })
    }

    /// Shut down: stop the distributor before releasing the store.
    pub async fn shutdown(&self) {
        self.stop_streaming().await;
        self.store.close().await;
        info!("ingestion orchestrator shut down");
    }
}
