//! Rate-limited historical fetch
//!
//! [`RateLimitedFetcher`] turns a single-chunk [`BarSource`] into a full
//! range fetcher: it partitions large ranges into bounded chunks, enforces a
//! global minimum interval between upstream requests, and retries transient
//! failures with linear backoff.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::FetchSettings;
use crate::provider::{BarSource, ProviderResult};
use crate::schema::Bar;

/// Gap inserted between consecutive chunk requests so a boundary instant is
/// never requested twice (the upstream treats both bounds as inclusive).
const CHUNK_BOUNDARY_GAP_MINUTES: i64 = 1;

/// Fetch policy derived from [`FetchSettings`]
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Maximum attempts per chunk
    pub retry_attempts: u32,
    /// Base retry delay, scaled linearly by attempt number
    pub retry_base_delay: Duration,
    /// Minimum interval between any two upstream requests
    pub rate_limit_delay: Duration,
    /// Maximum span of one chunk
    pub chunk_span: ChronoDuration,
}

impl FetchPolicy {
    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self {
            retry_attempts: settings.retry_attempts.max(1),
            retry_base_delay: Duration::from_secs(settings.retry_base_delay_secs),
            rate_limit_delay: Duration::from_millis(settings.rate_limit_delay_ms),
            chunk_span: ChronoDuration::days(settings.chunk_span_days),
        }
    }
}

/// Partition `[start, end)` into consecutive chunk windows.
///
/// Each window spans at most `span`; the next window starts one minute after
/// the previous one ends. `start >= end` yields no windows.
pub fn chunk_ranges(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    span: ChronoDuration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let window_end = (cursor + span).min(end);
        windows.push((cursor, window_end));
        cursor = window_end + ChronoDuration::minutes(CHUNK_BOUNDARY_GAP_MINUTES);
    }

    windows
}

/// Rate-limited, retrying historical fetcher.
///
/// The rate limiter is global: the minimum inter-request interval is enforced
/// across all instruments through a single shared timestamp.
pub struct RateLimitedFetcher<S> {
    source: S,
    policy: FetchPolicy,
    /// Time of the most recent upstream request, across all instruments
    last_request: Mutex<Option<Instant>>,
}

impl<S: BarSource> RateLimitedFetcher<S> {
    pub fn new(source: S, policy: FetchPolicy) -> Self {
        Self {
            source,
            policy,
            last_request: Mutex::new(None),
        }
    }

    /// Fetch all bars for `symbol` covering `[start, end)`, ascending by
    /// timestamp.
    ///
    /// An empty chunk is not an error; if no chunk produces data the result
    /// is an empty vector. A chunk whose retries are exhausted propagates the
    /// last upstream error, failing the whole range for this instrument.
    pub async fn fetch_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<Bar>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let windows = chunk_ranges(start, end, self.policy.chunk_span);
        let mut bars = Vec::new();

        for (window_start, window_end) in windows {
            let chunk = self.fetch_chunk(symbol, window_start, window_end).await?;
            if chunk.is_empty() {
                debug!(symbol, %window_start, %window_end, "no data for chunk");
                continue;
            }
            bars.extend(chunk);
        }

        // The upstream treats both bounds as inclusive, so a bar stamped
        // exactly `end` can come back from the final chunk. The returned
        // range is half-open; drop anything outside it.
        bars.retain(|bar| bar.timestamp >= start && bar.timestamp < end);
        bars.sort_by_key(|bar| bar.timestamp);
        Ok(bars)
    }

    /// Issue one chunk request, retrying transient failures with linear
    /// backoff (`base_delay × attempt_number` between attempts).
    async fn fetch_chunk(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<Bar>> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.throttle().await;

            match self.source.fetch_bars(symbol, start, end).await {
                Ok(bars) => return Ok(bars),
                Err(err) if err.is_transient() && attempt < self.policy.retry_attempts => {
                    let backoff = self.policy.retry_base_delay * attempt;
                    warn!(
                        symbol,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        %err,
                        "transient fetch failure, retrying"
                    );
                    sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Enforce the global minimum interval since the previous request.
    ///
    /// The mutex is held across the sleep so concurrent callers queue behind
    /// it and each observes the full interval.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let earliest = previous + self.policy.rate_limit_delay;
            let now = Instant::now();
            if earliest > now {
                sleep(earliest - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}
