//! # Market Ingest
//!
//! Ingestion core for time-series market data: fetches historical OHLCV bars
//! from an upstream API, persists them with integrity guarantees, and
//! redistributes newly arriving bars to internal consumers in near-real-time.
//!
//! ## Architecture
//!
//! - **Historical backfill**: chunked, rate-limited range fetches with
//!   bounded retry ([`fetch::RateLimitedFetcher`])
//! - **Validated storage**: transactional bar persistence over SQLite with a
//!   per-(instrument, timestamp) uniqueness guarantee ([`storage::BarStore`])
//! - **Real-time distribution**: a supervised background task that validates,
//!   persists, and republishes live bars on a TCP pub/sub bus
//!   ([`distributor::RealtimeDistributor`])
//! - **Orchestration**: sequences backfill across the instrument universe and
//!   runs periodic retention maintenance ([`orchestrator::IngestionOrchestrator`])

pub mod bus;
pub mod cli;
pub mod config;
pub mod distributor;
pub mod fetch;
pub mod orchestrator;
pub mod provider;
pub mod schema;
pub mod storage;
pub mod universe;
pub mod validation;

// Re-export commonly used types
pub use config::Settings;
pub use distributor::{DistributorState, RealtimeDistributor, StreamError};
pub use fetch::RateLimitedFetcher;
pub use orchestrator::{BackfillSummary, IngestionOrchestrator, MaintenanceReport};
pub use provider::{BarSource, FeedEvent, LiveBarFeed, ProviderError, ProviderResult};
pub use schema::{Bar, Instrument};
pub use storage::{BarStore, StoreError, StoreResult};
pub use validation::{validate_bar, ValidationError};
