//! Provider trait definitions
//!
//! These traits define the interface for upstream market data access. The
//! production implementation talks to the Alpaca-compatible REST and
//! streaming endpoints; tests use in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::schema::Bar;

/// Provider error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("upstream returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request error: {0}")]
    Request(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("subscription error: {0}")]
    Subscription(String),
}

impl ProviderError {
    /// Whether the failure is transient and worth retrying.
    ///
    /// Connection failures, timeouts, throttling responses, and server-side
    /// HTTP errors are transient; authentication, malformed-request, and
    /// parse failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Connection(_)
            | ProviderError::Timeout(_)
            | ProviderError::RateLimited(_) => true,
            ProviderError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Source of historical bars: one upstream request per call.
///
/// Chunking, rate limiting, and retry live above this seam in
/// [`crate::fetch::RateLimitedFetcher`]; implementations issue exactly one
/// request. An empty result is valid and means the upstream has no data for
/// the window.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Fetch bars for one symbol over `[start, end]`.
    async fn fetch_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<Bar>>;
}

/// Events delivered by a live bar feed
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A new bar arrived
    Bar(Bar),
    /// The feed connection failed; no further bars will arrive
    Disconnected(String),
}

/// Live bar feed subscription.
///
/// `subscribe` establishes the upstream connection and returns a channel of
/// feed events. The feed ends by sending [`FeedEvent::Disconnected`] (or by
/// closing the channel).
#[async_trait]
pub trait LiveBarFeed: Send + Sync {
    async fn subscribe(&self, symbols: &[String]) -> ProviderResult<mpsc::Receiver<FeedEvent>>;
}
