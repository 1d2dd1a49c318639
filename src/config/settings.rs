//! Application settings and configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Upstream API configuration (credentials, endpoints)
    pub api: ApiSettings,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Historical fetch configuration
    #[serde(default)]
    pub fetch: FetchSettings,
    /// Real-time stream configuration
    #[serde(default)]
    pub stream: StreamSettings,
    /// Internal pub/sub bus configuration
    #[serde(default)]
    pub bus: BusSettings,
    /// Instrument universe configuration
    #[serde(default)]
    pub universe: UniverseSettings,
    /// Storage and retention configuration
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Upstream API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL for the historical data REST API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebSocket URL for the live bar feed
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// API key ID (first static header credential)
    #[serde(default)]
    pub key_id: String,
    /// API secret key (second static header credential)
    #[serde(default)]
    pub secret_key: String,
}

fn default_base_url() -> String {
    "https://data.alpaca.markets".to_string()
}

fn default_feed_url() -> String {
    "wss://stream.data.alpaca.markets/v2/sip".to_string()
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            feed_url: default_feed_url(),
            key_id: String::new(),
            secret_key: String::new(),
        }
    }
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://data/market_data.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Historical fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Maximum attempts per chunk request
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay between retry attempts in seconds (scaled linearly by
    /// attempt number)
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,
    /// Minimum interval between any two upstream requests in milliseconds
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_ms: u64,
    /// Maximum span of a single chunk request in days
    #[serde(default = "default_chunk_span_days")]
    pub chunk_span_days: i64,
    /// Backfill lookback window in years
    #[serde(default = "default_lookback_years")]
    pub lookback_years: i64,
    /// Bar interval in minutes (upstream timeframe)
    #[serde(default = "default_bar_interval")]
    pub bar_interval_minutes: u32,
    /// Maximum records requested per chunk
    #[serde(default = "default_request_limit")]
    pub request_limit: u32,
    /// Courtesy pause between instruments during backfill, in milliseconds
    #[serde(default = "default_instrument_pause")]
    pub instrument_pause_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    5
}

fn default_rate_limit_delay() -> u64 {
    1000
}

fn default_chunk_span_days() -> i64 {
    7
}

fn default_lookback_years() -> i64 {
    2
}

fn default_bar_interval() -> u32 {
    5
}

fn default_request_limit() -> u32 {
    10_000
}

fn default_instrument_pause() -> u64 {
    250
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
            rate_limit_delay_ms: default_rate_limit_delay(),
            chunk_span_days: default_chunk_span_days(),
            lookback_years: default_lookback_years(),
            bar_interval_minutes: default_bar_interval(),
            request_limit: default_request_limit(),
            instrument_pause_ms: default_instrument_pause(),
        }
    }
}

/// Real-time stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Bounded wait for the consumption task to exit on stop, in seconds
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

fn default_stop_timeout() -> u64 {
    5
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

/// Internal pub/sub bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    /// TCP port the publisher binds to
    #[serde(default = "default_bus_port")]
    pub port: u16,
    /// Topic prefix for published bar messages
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_bus_port() -> u16 {
    5556
}

fn default_topic_prefix() -> String {
    "bars".to_string()
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            port: default_bus_port(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

/// Instrument universe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseSettings {
    /// Path to the delimited tickers file (must contain a `ticker` column)
    #[serde(default = "default_tickers_file")]
    pub tickers_file: String,
}

fn default_tickers_file() -> String {
    "data/tickers.csv".to_string()
}

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            tickers_file: default_tickers_file(),
        }
    }
}

/// Storage and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Bars older than this many days are removed by retention cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    365
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("MARKET_INGEST")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific configuration
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables (e.g., MARKET_INGEST__API__KEY_ID)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Get the configuration directory path
    fn config_dir() -> String {
        std::env::var("MARKET_INGEST_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Check required settings. Missing credentials are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.key_id.trim().is_empty() {
            return Err(ConfigError::Message(
                "api.key_id is required (MARKET_INGEST__API__KEY_ID)".to_string(),
            ));
        }
        if self.api.secret_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "api.secret_key is required (MARKET_INGEST__API__SECRET_KEY)".to_string(),
            ));
        }
        if self.fetch.retry_attempts == 0 {
            return Err(ConfigError::Message(
                "fetch.retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create default settings (useful for testing)
    pub fn default_settings() -> Self {
        Settings {
            api: ApiSettings {
                key_id: "test-key".to_string(),
                secret_key: "test-secret".to_string(),
                ..ApiSettings::default()
            },
            database: DatabaseSettings::default(),
            fetch: FetchSettings::default(),
            stream: StreamSettings::default(),
            bus: BusSettings::default(),
            universe: UniverseSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}
