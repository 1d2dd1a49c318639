//! Alpaca market data provider
//!
//! REST client for historical bars and WebSocket client for the live bar
//! feed. Both authenticate with the same static credential pair.

mod client;
mod stream;
mod types;

pub use client::RestClient;
pub use stream::StreamClient;
