//! Alpaca wire types
//!
//! Raw REST and stream payload shapes. These are normalized to
//! [`crate::schema::Bar`] at the provider boundary.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::schema::Bar;

/// Response body of the historical bars endpoint
#[derive(Debug, Deserialize)]
pub struct BarsResponse {
    /// Missing or null when the range holds no data
    #[serde(default)]
    pub bars: Option<Vec<RawBar>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One bar as returned by the REST endpoint: `{t, o, h, l, c, v}`
#[derive(Debug, Clone, Deserialize)]
pub struct RawBar {
    #[serde(rename = "t")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: i64,
}

impl RawBar {
    pub fn into_bar(self, symbol: &str) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// One message from the streaming endpoint.
///
/// The stream delivers JSON arrays of tagged objects; bar messages carry
/// `"T": "b"` and the same OHLCV shape as the REST endpoint.
#[derive(Debug, Deserialize)]
pub struct StreamMessage {
    #[serde(rename = "T")]
    pub kind: String,
    #[serde(rename = "S", default)]
    pub symbol: Option<String>,
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "o", default)]
    pub open: Option<f64>,
    #[serde(rename = "h", default)]
    pub high: Option<f64>,
    #[serde(rename = "l", default)]
    pub low: Option<f64>,
    #[serde(rename = "c", default)]
    pub close: Option<f64>,
    #[serde(rename = "v", default)]
    pub volume: Option<i64>,
    #[serde(rename = "msg", default)]
    pub message: Option<String>,
}

impl StreamMessage {
    /// Convert a `"T": "b"` message into a bar, if all fields are present
    pub fn into_bar(self) -> Option<Bar> {
        Some(Bar {
            symbol: self.symbol?,
            timestamp: self.timestamp?,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume?,
        })
    }
}
