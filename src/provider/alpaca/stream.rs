//! Live bar feed WebSocket client

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::ApiSettings;
use crate::provider::{FeedEvent, LiveBarFeed, ProviderError, ProviderResult};

use super::types::StreamMessage;

/// Capacity of the feed event channel handed to the consumer
const FEED_CHANNEL_CAPACITY: usize = 1024;

/// WebSocket client for the live bar feed.
///
/// `subscribe` connects, authenticates, subscribes to per-symbol bar
/// channels, and spawns a read task that forwards parsed bars as
/// [`FeedEvent`]s. A socket error or close ends the feed with
/// [`FeedEvent::Disconnected`].
pub struct StreamClient {
    feed_url: String,
    key_id: String,
    secret_key: String,
}

impl StreamClient {
    pub fn new(api: &ApiSettings) -> Self {
        Self {
            feed_url: api.feed_url.clone(),
            key_id: api.key_id.clone(),
            secret_key: api.secret_key.clone(),
        }
    }
}

#[async_trait]
impl LiveBarFeed for StreamClient {
    async fn subscribe(&self, symbols: &[String]) -> ProviderResult<mpsc::Receiver<FeedEvent>> {
        let (ws, _) = connect_async(&self.feed_url)
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let auth = json!({
            "action": "auth",
            "key": self.key_id,
            "secret": self.secret_key,
        });
        write
            .send(Message::Text(auth.to_string()))
            .await
            .map_err(|e| ProviderError::Authentication(e.to_string()))?;

        let subscribe = json!({
            "action": "subscribe",
            "bars": symbols,
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| ProviderError::Subscription(e.to_string()))?;

        info!(count = symbols.len(), "subscribed to live bar channels");

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let messages: Vec<StreamMessage> = match serde_json::from_str(&text) {
                            Ok(messages) => messages,
                            Err(err) => {
                                warn!(%err, "ignoring unparseable stream frame");
                                continue;
                            }
                        };

                        for message in messages {
                            match message.kind.as_str() {
                                "b" => {
                                    if let Some(bar) = message.into_bar() {
                                        if tx.send(FeedEvent::Bar(bar)).await.is_err() {
                                            // Consumer went away; nothing left to feed.
                                            return;
                                        }
                                    }
                                }
                                "error" => {
                                    let reason = message
                                        .message
                                        .unwrap_or_else(|| "upstream stream error".to_string());
                                    error!(%reason, "live feed reported an error");
                                    let _ = tx.send(FeedEvent::Disconnected(reason)).await;
                                    return;
                                }
                                other => {
                                    debug!(kind = other, "ignoring control message");
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = tx
                            .send(FeedEvent::Disconnected("connection closed".to_string()))
                            .await;
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let _ = tx.send(FeedEvent::Disconnected(err.to_string())).await;
                        return;
                    }
                }
            }

            let _ = tx
                .send(FeedEvent::Disconnected("stream ended".to_string()))
                .await;
        });

        Ok(rx)
    }
}
