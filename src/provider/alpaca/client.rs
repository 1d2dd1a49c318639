//! Historical bars REST client

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use tracing::debug;

use crate::config::{ApiSettings, FetchSettings};
use crate::provider::{BarSource, ProviderError, ProviderResult};
use crate::schema::Bar;

use super::types::BarsResponse;

/// Header carrying the API key ID
const HEADER_KEY_ID: &str = "APCA-API-KEY-ID";
/// Header carrying the API secret key
const HEADER_SECRET_KEY: &str = "APCA-API-SECRET-KEY";

/// REST client for the historical bars endpoint.
///
/// Issues exactly one request per [`BarSource::fetch_bars`] call; retry and
/// rate limiting are handled by the fetcher above this seam.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    timeframe: String,
    limit: u32,
}

impl RestClient {
    /// Create a client from settings. Both credentials are attached as
    /// default headers on every request.
    pub fn new(api: &ApiSettings, fetch: &FetchSettings) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_KEY_ID,
            HeaderValue::from_str(&api.key_id)
                .map_err(|_| ProviderError::Authentication("invalid API key ID".to_string()))?,
        );
        headers.insert(
            HEADER_SECRET_KEY,
            HeaderValue::from_str(&api.secret_key)
                .map_err(|_| ProviderError::Authentication("invalid API secret key".to_string()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        Ok(Self {
            http,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            timeframe: format!("{}Min", fetch.bar_interval_minutes),
            limit: fetch.request_limit,
        })
    }

    fn map_send_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() {
            ProviderError::Connection(err.to_string())
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl BarSource for RestClient {
    async fn fetch_bars(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ProviderResult<Vec<Bar>> {
        let url = format!("{}/v2/stocks/{}/bars", self.base_url, symbol);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("timeframe", self.timeframe.clone()),
                ("limit", self.limit.to_string()),
            ])
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ProviderError::Authentication(message)
                }
                StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
                _ => ProviderError::Http {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let body: BarsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let bars: Vec<Bar> = body
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(|raw| raw.into_bar(symbol))
            .collect();

        debug!(symbol, count = bars.len(), %start, %end, "fetched bar chunk");
        Ok(bars)
    }
}
