//! Upstream data providers
//!
//! The [`BarSource`] and [`LiveBarFeed`] traits define the seams between the
//! ingestion core and the upstream API. The `alpaca` module provides the
//! production implementation; tests substitute mock implementations.

pub mod alpaca;
mod traits;

pub use traits::{BarSource, FeedEvent, LiveBarFeed, ProviderError, ProviderResult};
