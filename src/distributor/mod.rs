//! Real-time bar distribution
//!
//! [`RealtimeDistributor`] subscribes to the live bar feed, validates each
//! incoming bar, persists it, republishes it on the internal bus, and tracks
//! the last seen price per instrument. The consumption loop runs as a
//! supervised background task with a cooperative, bounded-timeout stop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::BarPublisher;
use crate::config::{BusSettings, StreamSettings};
use crate::provider::{FeedEvent, LiveBarFeed, ProviderError};
use crate::schema::Bar;
use crate::storage::BarStore;
use crate::validation::validate_bar;

/// Distributor errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StreamError {
    #[error("distributor is already running")]
    AlreadyRunning,

    #[error("failed to bind bus publisher: {0}")]
    Bind(#[from] std::io::Error),

    #[error("failed to subscribe to live feed: {0}")]
    Subscribe(#[from] ProviderError),

    #[error("live feed disconnected: {0}")]
    Disconnected(String),
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Distributor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Distributor configuration derived from settings
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// TCP port for the bus publisher
    pub bind_port: u16,
    /// Topic prefix for published bar messages
    pub topic_prefix: String,
    /// Bounded wait for the consumption task on stop
    pub stop_timeout: Duration,
}

impl DistributorConfig {
    pub fn from_settings(bus: &BusSettings, stream: &StreamSettings) -> Self {
        Self {
            bind_port: bus.port,
            topic_prefix: bus.topic_prefix.clone(),
            stop_timeout: Duration::from_secs(stream.stop_timeout_secs),
        }
    }
}

struct RunningTask {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Real-time bar distributor.
///
/// `start` and `stop` may be called from different tasks; the state machine
/// is guarded so only one consumption loop can exist at a time.
pub struct RealtimeDistributor {
    store: Arc<BarStore>,
    feed: Arc<dyn LiveBarFeed>,
    config: DistributorConfig,
    state: Arc<parking_lot::Mutex<DistributorState>>,
    task: parking_lot::Mutex<Option<RunningTask>>,
    /// Transient last-seen close per instrument; not a source of truth
    last_prices: Arc<parking_lot::RwLock<HashMap<String, f64>>>,
    last_error: Arc<parking_lot::Mutex<Option<String>>>,
}

impl RealtimeDistributor {
    pub fn new(store: Arc<BarStore>, feed: Arc<dyn LiveBarFeed>, config: DistributorConfig) -> Self {
        Self {
            store,
            feed,
            config,
            state: Arc::new(parking_lot::Mutex::new(DistributorState::Stopped)),
            task: parking_lot::Mutex::new(None),
            last_prices: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            last_error: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DistributorState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DistributorState::Running
    }

    /// Reason for the most recent feed failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Last seen close price for a symbol (in-memory cache, reset on restart)
    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.last_prices.read().get(symbol).copied()
    }

    /// Start the distributor: bind the bus publisher, subscribe to the live
    /// feed for every given instrument, and spawn the consumption loop.
    ///
    /// Returns the bound bus address. Starting while not stopped is an error.
    pub async fn start(&self, symbols: &[String]) -> StreamResult<SocketAddr> {
        {
            let mut state = self.state.lock();
            if *state != DistributorState::Stopped {
                warn!("distributor start requested while already active");
                return Err(StreamError::AlreadyRunning);
            }
            *state = DistributorState::Starting;
        }
        *self.last_error.lock() = None;

        let publisher = match BarPublisher::bind(self.config.bind_port).await {
            Ok(publisher) => publisher,
            Err(err) => {
                *self.state.lock() = DistributorState::Stopped;
                return Err(err.into());
            }
        };
        let addr = publisher.local_addr();

        let feed_rx = match self.feed.subscribe(symbols).await {
            Ok(rx) => rx,
            Err(err) => {
                *self.state.lock() = DistributorState::Stopped;
                return Err(err.into());
            }
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        // The state must read Running before the loop is spawned: the loop's
        // own transitions (e.g. Stopped on an immediate disconnect) are
        // authoritative from the moment it runs and must not be clobbered.
        *self.state.lock() = DistributorState::Running;
        let handle = tokio::spawn(consume_loop(
            self.store.clone(),
            publisher,
            feed_rx,
            shutdown_rx,
            self.state.clone(),
            self.last_prices.clone(),
            self.last_error.clone(),
            self.config.topic_prefix.clone(),
        ));

        *self.task.lock() = Some(RunningTask {
            shutdown: shutdown_tx,
            handle,
        });

        info!(%addr, instruments = symbols.len(), "real-time distributor running");
        Ok(addr)
    }

    /// Stop the distributor: signal the consumption loop, wait (bounded) for
    /// it to exit, and release the publish endpoint.
    ///
    /// Safe to call from any task, and a no-op when already stopped.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            debug!("distributor stop requested while not running");
            return;
        };

        *self.state.lock() = DistributorState::Stopping;
        let _ = task.shutdown.send(());

        let abort_handle = task.handle.abort_handle();
        match tokio::time::timeout(self.config.stop_timeout, task.handle).await {
            Ok(_) => info!("real-time distributor stopped"),
            Err(_) => {
                abort_handle.abort();
                warn!(
                    timeout_secs = self.config.stop_timeout.as_secs(),
                    "distributor did not stop in time; task forcibly terminated"
                );
            }
        }

        *self.state.lock() = DistributorState::Stopped;
    }
}

/// Feed-consumption loop: runs until a stop signal or a fatal feed error.
#[allow(clippy::too_many_arguments)]
async fn consume_loop(
    store: Arc<BarStore>,
    publisher: BarPublisher,
    mut feed_rx: mpsc::Receiver<FeedEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
    state: Arc<parking_lot::Mutex<DistributorState>>,
    last_prices: Arc<parking_lot::RwLock<HashMap<String, f64>>>,
    last_error: Arc<parking_lot::Mutex<Option<String>>>,
    topic_prefix: String,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("distributor received stop signal");
                break;
            }
            event = feed_rx.recv() => match event {
                Some(FeedEvent::Bar(bar)) => {
                    handle_bar(&store, &publisher, &last_prices, &topic_prefix, bar).await;
                }
                Some(FeedEvent::Disconnected(reason)) => {
                    error!(%reason, "live feed disconnected");
                    *last_error.lock() = Some(reason);
                    *state.lock() = DistributorState::Stopped;
                    return;
                }
                None => {
                    error!("live feed channel closed unexpectedly");
                    *last_error.lock() = Some("feed channel closed".to_string());
                    *state.lock() = DistributorState::Stopped;
                    return;
                }
            }
        }
    }
    // Publisher is dropped here, releasing the bus endpoint.
}

/// Process one live bar: validate, persist, publish, cache last price.
///
/// A validation or persistence failure drops the bar and keeps the feed
/// running; duplicate timestamps from upstream redelivery are rejected by
/// the store's uniqueness constraint and land here as persistence failures.
async fn handle_bar(
    store: &BarStore,
    publisher: &BarPublisher,
    last_prices: &parking_lot::RwLock<HashMap<String, f64>>,
    topic_prefix: &str,
    bar: Bar,
) {
    if let Err(err) = validate_bar(&bar) {
        warn!(symbol = %bar.symbol, %err, "discarding invalid live bar");
        return;
    }

    if let Err(err) = store.bulk_insert(std::slice::from_ref(&bar)).await {
        warn!(symbol = %bar.symbol, %err, "failed to persist live bar; dropping");
        return;
    }

    match serde_json::to_string(&bar) {
        Ok(payload) => {
            let topic = format!("{}.{}", topic_prefix, bar.symbol);
            publisher.publish(&topic, &payload).await;
        }
        Err(err) => warn!(symbol = %bar.symbol, %err, "failed to encode bar for bus"),
    }

    last_prices.write().insert(bar.symbol.clone(), bar.close);
}
