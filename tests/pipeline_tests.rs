//! End-to-end pipeline tests: backfill through the orchestrator, live bar
//! distribution through the bus, and maintenance scheduling. Upstream access
//! is mocked at the provider seams; storage is a real in-memory database.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use market_ingest::config::Settings;
use market_ingest::distributor::{
    DistributorConfig, DistributorState, RealtimeDistributor, StreamError,
};
use market_ingest::fetch::{FetchPolicy, RateLimitedFetcher};
use market_ingest::orchestrator::IngestionOrchestrator;
use market_ingest::provider::{
    BarSource, FeedEvent, LiveBarFeed, ProviderError, ProviderResult,
};
use market_ingest::schema::Bar;
use market_ingest::storage::BarStore;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn bar(symbol: &str, timestamp: DateTime<Utc>, close: f64) -> Bar {
    Bar::new(symbol, timestamp, close - 0.2, close + 0.5, close - 0.5, close, 100)
}

/// Settings tuned so tests never sleep on real time
fn test_settings() -> Settings {
    let mut settings = Settings::default_settings();
    settings.bus.port = 0;
    settings.fetch.rate_limit_delay_ms = 0;
    settings.fetch.retry_base_delay_secs = 0;
    settings.fetch.instrument_pause_ms = 0;
    settings.fetch.lookback_years = 1;
    settings.fetch.chunk_span_days = 100_000;
    settings.storage.retention_days = 30;
    settings
}

/// Historical source scripted per symbol
#[derive(Default)]
struct ScriptedSource {
    bars: HashMap<String, Vec<Bar>>,
    failing: HashSet<String>,
}

impl ScriptedSource {
    fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    fn failing_for(mut self, symbol: &str) -> Self {
        self.failing.insert(symbol.to_string());
        self
    }
}

#[async_trait]
impl BarSource for ScriptedSource {
    async fn fetch_bars(
        &self,
        symbol: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> ProviderResult<Vec<Bar>> {
        if self.failing.contains(symbol) {
            return Err(ProviderError::Authentication("scripted failure".into()));
        }
        Ok(self.bars.get(symbol).cloned().unwrap_or_default())
    }
}

/// Live feed handing out a pre-built event channel
struct ScriptedFeed {
    rx: parking_lot::Mutex<Option<mpsc::Receiver<FeedEvent>>>,
}

impl ScriptedFeed {
    fn new() -> (Arc<Self>, mpsc::Sender<FeedEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let feed = Arc::new(Self {
            rx: parking_lot::Mutex::new(Some(rx)),
        });
        (feed, tx)
    }
}

#[async_trait]
impl LiveBarFeed for ScriptedFeed {
    async fn subscribe(&self, _symbols: &[String]) -> ProviderResult<mpsc::Receiver<FeedEvent>> {
        self.rx
            .lock()
            .take()
            .ok_or_else(|| ProviderError::Subscription("already subscribed".into()))
    }
}

fn distributor_config() -> DistributorConfig {
    DistributorConfig {
        bind_port: 0,
        topic_prefix: "bars".to_string(),
        stop_timeout: Duration::from_secs(1),
    }
}

async fn orchestrator_with(
    settings: Settings,
    source: ScriptedSource,
) -> IngestionOrchestrator<ScriptedSource> {
    let store = Arc::new(BarStore::open_in_memory().await.unwrap());
    let fetcher = RateLimitedFetcher::new(source, FetchPolicy::from_settings(&settings.fetch));
    let (feed, _tx) = ScriptedFeed::new();
    let distributor = RealtimeDistributor::new(store.clone(), feed, distributor_config());
    IngestionOrchestrator::new(settings, store, fetcher, distributor)
}

#[tokio::test]
async fn distributor_stores_and_publishes_valid_bars() {
    let store = Arc::new(BarStore::open_in_memory().await.unwrap());
    store.upsert_instrument("ABC").await.unwrap();

    let (feed, feed_tx) = ScriptedFeed::new();
    let distributor = RealtimeDistributor::new(store.clone(), feed, distributor_config());

    let symbols = vec!["ABC".to_string()];
    let addr = distributor.start(&symbols).await.unwrap();
    assert!(distributor.is_running());

    let subscriber = TcpStream::connect(addr).await.unwrap();
    let mut lines = BufReader::new(subscriber).lines();
    // Let the accept loop register the subscriber before publishing
    tokio::time::sleep(Duration::from_millis(50)).await;

    let live = bar("ABC", utc(2024, 3, 1, 14, 30), 101.5);
    feed_tx.send(FeedEvent::Bar(live.clone())).await.unwrap();

    let line = timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let (topic, payload) = line.split_once(' ').unwrap();
    assert_eq!(topic, "bars.ABC");
    let decoded: Bar = serde_json::from_str(payload).unwrap();
    assert_eq!(decoded, live);

    // The bar was persisted and the last-price cache updated
    assert_eq!(store.count_bars("ABC").await.unwrap(), 1);
    assert_eq!(distributor.last_price("ABC"), Some(101.5));

    distributor.stop().await;
    assert_eq!(distributor.state(), DistributorState::Stopped);
}

#[tokio::test]
async fn distributor_drops_invalid_bars_without_stopping() {
    let store = Arc::new(BarStore::open_in_memory().await.unwrap());
    store.upsert_instrument("ABC").await.unwrap();

    let (feed, feed_tx) = ScriptedFeed::new();
    let distributor = RealtimeDistributor::new(store.clone(), feed, distributor_config());
    let addr = distributor.start(&["ABC".to_string()]).await.unwrap();

    let subscriber = TcpStream::connect(addr).await.unwrap();
    let mut lines = BufReader::new(subscriber).lines();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // High below the open makes the bar internally inconsistent
    let invalid = Bar::new("ABC", utc(2024, 3, 1, 14, 30), 10.0, 9.0, 8.0, 9.5, 100);
    feed_tx.send(FeedEvent::Bar(invalid)).await.unwrap();

    let valid = bar("ABC", utc(2024, 3, 1, 14, 35), 10.2);
    feed_tx.send(FeedEvent::Bar(valid.clone())).await.unwrap();

    // Only the valid bar reaches the bus and the store
    let line = timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let decoded: Bar = serde_json::from_str(line.split_once(' ').unwrap().1).unwrap();
    assert_eq!(decoded, valid);
    assert_eq!(store.count_bars("ABC").await.unwrap(), 1);
    assert!(distributor.is_running());

    distributor.stop().await;
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let store = Arc::new(BarStore::open_in_memory().await.unwrap());
    let (feed, _feed_tx) = ScriptedFeed::new();
    let distributor = RealtimeDistributor::new(store, feed, distributor_config());

    let symbols = vec!["ABC".to_string()];
    distributor.start(&symbols).await.unwrap();

    let err = distributor.start(&symbols).await.unwrap_err();
    assert!(matches!(err, StreamError::AlreadyRunning));
    assert!(distributor.is_running());

    distributor.stop().await;
}

#[tokio::test]
async fn stop_when_not_running_is_a_no_op() {
    let store = Arc::new(BarStore::open_in_memory().await.unwrap());
    let (feed, _feed_tx) = ScriptedFeed::new();
    let distributor = RealtimeDistributor::new(store, feed, distributor_config());

    distributor.stop().await;
    assert_eq!(distributor.state(), DistributorState::Stopped);
}

#[tokio::test]
async fn feed_disconnect_stops_the_distributor_and_records_the_reason() {
    let store = Arc::new(BarStore::open_in_memory().await.unwrap());
    let (feed, feed_tx) = ScriptedFeed::new();
    let distributor = RealtimeDistributor::new(store, feed, distributor_config());
    distributor.start(&["ABC".to_string()]).await.unwrap();

    feed_tx
        .send(FeedEvent::Disconnected("upstream closed".into()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(distributor.state(), DistributorState::Stopped);
    assert_eq!(distributor.last_error().as_deref(), Some("upstream closed"));

    // A restart after the failure is allowed once the finished task is cleared
    distributor.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_queued_before_start_still_ends_stopped() {
    // The consumption loop may consume a disconnect the instant it is
    // spawned; its Stopped transition must survive start() completing.
    for _ in 0..50 {
        let store = Arc::new(BarStore::open_in_memory().await.unwrap());
        let (feed, feed_tx) = ScriptedFeed::new();
        feed_tx
            .send(FeedEvent::Disconnected("upstream closed".into()))
            .await
            .unwrap();

        let distributor = RealtimeDistributor::new(store, feed, distributor_config());
        distributor.start(&["ABC".to_string()]).await.unwrap();

        let settled = timeout(Duration::from_secs(2), async {
            while distributor.state() != DistributorState::Stopped {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(settled.is_ok(), "distributor never left Running after a disconnect");
        assert_eq!(distributor.last_error().as_deref(), Some("upstream closed"));

        distributor.stop().await;
    }
}

#[tokio::test]
async fn backfill_persists_valid_history_and_skips_invalid_bars() {
    // Inside the lookback window regardless of when the test runs
    let t0 = Utc::now() - ChronoDuration::days(30);
    let history = vec![
        bar("AAPL", t0, 10.0),
        // Invalid: high below the rest of the bar
        Bar::new("AAPL", t0 + ChronoDuration::minutes(5), 10.0, 9.0, 8.0, 9.5, 100),
        bar("AAPL", t0 + ChronoDuration::minutes(10), 10.2),
    ];
    let source = ScriptedSource::default().with_bars("AAPL", history);
    let orchestrator = orchestrator_with(test_settings(), source).await;
    orchestrator.store().upsert_instrument("AAPL").await.unwrap();

    let summary = orchestrator.run_backfill(&["AAPL".to_string()]).await;

    assert!(summary.is_clean());
    assert_eq!(summary.instruments, 1);
    assert_eq!(summary.bars_inserted, 2);
    assert_eq!(summary.bars_rejected, 1);
    assert_eq!(orchestrator.store().count_bars("AAPL").await.unwrap(), 2);
}

#[tokio::test]
async fn one_failing_instrument_does_not_abort_the_run() {
    let t0 = Utc::now() - ChronoDuration::days(30);
    let source = ScriptedSource::default()
        .with_bars("AAPL", vec![bar("AAPL", t0, 10.0)])
        .failing_for("BAD")
        .with_bars("MSFT", vec![bar("MSFT", t0, 20.0)]);
    let orchestrator = orchestrator_with(test_settings(), source).await;
    for symbol in ["AAPL", "BAD", "MSFT"] {
        orchestrator.store().upsert_instrument(symbol).await.unwrap();
    }

    let symbols: Vec<String> = ["AAPL", "BAD", "MSFT"].map(String::from).to_vec();
    let summary = orchestrator.run_backfill(&symbols).await;

    assert_eq!(summary.instruments, 3);
    assert_eq!(summary.bars_inserted, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].symbol, "BAD");

    // The instruments around the failure were fully processed
    assert_eq!(orchestrator.store().count_bars("AAPL").await.unwrap(), 1);
    assert_eq!(orchestrator.store().count_bars("MSFT").await.unwrap(), 1);
    assert_eq!(orchestrator.store().count_bars("BAD").await.unwrap(), 0);
}

#[tokio::test]
async fn rerunning_backfill_over_stored_history_fails_on_duplicates() {
    let t0 = Utc::now() - ChronoDuration::days(30);
    let source = ScriptedSource::default().with_bars("AAPL", vec![bar("AAPL", t0, 10.0)]);
    let orchestrator = orchestrator_with(test_settings(), source).await;
    orchestrator.store().upsert_instrument("AAPL").await.unwrap();

    let symbols = vec!["AAPL".to_string()];
    let first = orchestrator.run_backfill(&symbols).await;
    assert!(first.is_clean());

    // The upstream redelivers the same window; duplicates are rejected, not
    // overwritten, so the second pass records a failure and keeps one row.
    let second = orchestrator.run_backfill(&symbols).await;
    assert_eq!(second.failures.len(), 1);
    assert_eq!(orchestrator.store().count_bars("AAPL").await.unwrap(), 1);
}

#[tokio::test]
async fn register_universe_loads_and_registers_symbols() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "ticker").unwrap();
    writeln!(file, "aapl").unwrap();
    writeln!(file, "MSFT").unwrap();
    writeln!(file, " msft ").unwrap();
    file.flush().unwrap();

    let mut settings = test_settings();
    settings.universe.tickers_file = file.path().to_string_lossy().into_owned();
    let orchestrator = orchestrator_with(settings, ScriptedSource::default()).await;

    let symbols = orchestrator.register_universe().await.unwrap();
    assert_eq!(symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);

    for symbol in &symbols {
        assert!(orchestrator
            .store()
            .get_instrument(symbol)
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn maintenance_cleanup_runs_at_most_once_per_period() {
    let orchestrator =
        orchestrator_with(test_settings(), ScriptedSource::default()).await;
    orchestrator.store().upsert_instrument("AAPL").await.unwrap();
    orchestrator
        .store()
        .bulk_insert(&[
            bar("AAPL", Utc::now() - ChronoDuration::days(60), 10.0),
            bar("AAPL", Utc::now() - ChronoDuration::days(1), 10.1),
        ])
        .await
        .unwrap();

    let first = orchestrator.run_maintenance().await.unwrap();
    assert_eq!(first.bars_deleted, Some(1));
    assert_eq!(first.instruments_touched, 1);

    // An immediate second pass still runs the integrity check but skips the
    // retention cleanup
    let second = orchestrator.run_maintenance().await.unwrap();
    assert_eq!(second.bars_deleted, None);
    assert_eq!(second.instruments_touched, 1);

    assert_eq!(orchestrator.store().count_bars("AAPL").await.unwrap(), 1);
}

#[tokio::test]
async fn shutdown_stops_streaming_and_closes_the_store() {
    let store = Arc::new(BarStore::open_in_memory().await.unwrap());
    let (feed, _feed_tx) = ScriptedFeed::new();
    let distributor = RealtimeDistributor::new(store.clone(), feed, distributor_config());
    let settings = test_settings();
    let fetcher = RateLimitedFetcher::new(
        ScriptedSource::default(),
        FetchPolicy::from_settings(&settings.fetch),
    );
    let orchestrator = IngestionOrchestrator::new(settings, store, fetcher, distributor);

    orchestrator
        .start_streaming(&["ABC".to_string()])
        .await
        .unwrap();
    assert!(orchestrator.distributor().is_running());

    orchestrator.shutdown().await;
    assert_eq!(orchestrator.distributor().state(), DistributorState::Stopped);
    assert!(orchestrator.store().pool().is_closed());
}
