//! Canonical market data types
//!
//! Provider-specific payloads are normalized into these types before
//! validation, storage, or distribution. The serde representation of [`Bar`]
//! is also the wire format published on the internal bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV observation for one instrument at one timestamp.
///
/// Bars are immutable once persisted; there is no update path. They are
/// removed only by retention cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Instrument symbol (e.g. "AAPL")
    pub symbol: String,
    /// Bar open time (UTC)
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Traded volume over the bar interval
    pub volume: i64,
}

impl Bar {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// A tracked instrument.
///
/// Created when first referenced by the universe loader; never deleted during
/// normal operation. `last_updated_at` is advanced by backfill and by the
/// periodic integrity pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub added_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}
