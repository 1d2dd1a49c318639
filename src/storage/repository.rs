//! Bar store repository
//!
//! Transactional read/write/delete operations over instrument and bar
//! records. Uniqueness of (symbol, timestamp) is enforced by the storage
//! layer itself: a duplicate insert fails the transaction instead of
//! overwriting.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DatabaseSettings;
use crate::schema::{Bar, Instrument};

/// Deleting at least this many rows triggers physical storage reclamation
const VACUUM_THRESHOLD: u64 = 1_000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS instruments (
    symbol          TEXT PRIMARY KEY,
    added_at        TEXT NOT NULL,
    last_updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bars (
    symbol    TEXT NOT NULL REFERENCES instruments(symbol),
    timestamp TEXT NOT NULL,
    open      REAL NOT NULL,
    high      REAL NOT NULL,
    low       REAL NOT NULL,
    close     REAL NOT NULL,
    volume    INTEGER NOT NULL,
    UNIQUE (symbol, timestamp)
);
"#;

/// Store errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bulk insert of {batch_size} bars failed: {source}")]
    BulkInsert {
        batch_size: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent bar store
///
/// Batch writes (backfill, cleanup) are serialized by an advisory lock held
/// for the duration of the operation; single-bar live writes are independent
/// small transactions that share the same path.
pub struct BarStore {
    pool: SqlitePool,
    write_lock: tokio::sync::Mutex<()>,
}

impl BarStore {
    /// Open (creating if missing) the store at the configured location
    pub async fn from_settings(settings: &DatabaseSettings) -> StoreResult<Self> {
        Self::open(&settings.url, settings.max_connections).await
    }

    /// Open a store at `url` with the given pool size
    pub async fn open(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Open an in-memory store (tests). A single connection keeps every
    /// operation on the same in-memory database.
    pub async fn open_in_memory() -> StoreResult<Self> {
        Self::open("sqlite::memory:", 1).await
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight operations
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Register an instrument. Idempotent: a no-op if already present.
    pub async fn upsert_instrument(&self, symbol: &str) -> StoreResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO instruments (symbol, added_at, last_updated_at)
            VALUES (?1, ?2, ?2)
            ON CONFLICT(symbol) DO NOTHING
            "#,
        )
        .bind(symbol)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a batch of bars in one transaction.
    ///
    /// Either every bar commits or none does: any persistence-level failure
    /// (including a duplicate (symbol, timestamp)) rolls the batch back and
    /// surfaces the batch size with the cause.
    pub async fn bulk_insert(&self, bars: &[Bar]) -> StoreResult<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for bar in bars {
            let result = sqlx::query(
                r#"
                INSERT INTO bars (symbol, timestamp, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&bar.symbol)
            .bind(bar.timestamp)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await;

            if let Err(source) = result {
                tx.rollback().await.ok();
                return Err(StoreError::BulkInsert {
                    batch_size: bars.len(),
                    source,
                });
            }
        }

        tx.commit().await?;
        debug!(count = bars.len(), "committed bar batch");
        Ok(bars.len())
    }

    /// Query bars for a symbol over `[start, end]` (inclusive bounds),
    /// ascending by timestamp.
    pub async fn query(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Bar>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, timestamp, open, high, low, close, volume
            FROM bars
            WHERE symbol = ?1 AND timestamp >= ?2 AND timestamp <= ?3
            ORDER BY timestamp ASC
            "#,
        )
        .bind(symbol)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let bars = rows
            .iter()
            .map(|row| Bar {
                symbol: row.get("symbol"),
                timestamp: row.get("timestamp"),
                open: row.get("open"),
                high: row.get("high"),
                low: row.get("low"),
                close: row.get("close"),
                volume: row.get("volume"),
            })
            .collect();

        Ok(bars)
    }

    /// Delete all bars older than `retention_days`. Returns the number of
    /// rows deleted; a non-trivial deletion also reclaims physical storage.
    pub async fn cleanup_older_than(&self, retention_days: u32) -> StoreResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));

        let deleted = {
            let _guard = self.write_lock.lock().await;
            sqlx::query("DELETE FROM bars WHERE timestamp < ?1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?
                .rows_affected()
        };

        if deleted > 0 {
            info!(deleted, %cutoff, "retention cleanup removed old bars");
        }
        if deleted >= VACUUM_THRESHOLD {
            sqlx::raw_sql("VACUUM").execute(&self.pool).await?;
            debug!("reclaimed storage after retention cleanup");
        }

        Ok(deleted)
    }

    /// Mark an instrument as freshly validated
    pub async fn touch_last_updated(&self, symbol: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE instruments SET last_updated_at = ?1 WHERE symbol = ?2")
            .bind(Utc::now())
            .bind(symbol)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownInstrument(symbol.to_string()));
        }
        Ok(())
    }

    /// Look up an instrument record
    pub async fn get_instrument(&self, symbol: &str) -> StoreResult<Option<Instrument>> {
        let row = sqlx::query(
            "SELECT symbol, added_at, last_updated_at FROM instruments WHERE symbol = ?1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Instrument {
            symbol: row.get("symbol"),
            added_at: row.get("added_at"),
            last_updated_at: row.get("last_updated_at"),
        }))
    }

    /// Symbols that have at least one stored bar
    pub async fn instruments_with_bars(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT symbol FROM bars ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("symbol")).collect())
    }

    /// Number of stored bars for a symbol
    pub async fn count_bars(&self, symbol: &str) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM bars WHERE symbol = ?1")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(symbol: &str, timestamp: DateTime<Utc>, close: f64) -> Bar {
        Bar::new(symbol, timestamp, close - 0.2, close + 0.5, close - 0.5, close, 100)
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    async fn store_with_instrument(symbol: &str) -> BarStore {
        let store = BarStore::open_in_memory().await.unwrap();
        store.upsert_instrument(symbol).await.unwrap();
        store
    }

    #[tokio::test]
    async fn upsert_instrument_is_idempotent() {
        let store = BarStore::open_in_memory().await.unwrap();
        store.upsert_instrument("AAPL").await.unwrap();
        let first = store.get_instrument("AAPL").await.unwrap().unwrap();

        store.upsert_instrument("AAPL").await.unwrap();
        let second = store.get_instrument("AAPL").await.unwrap().unwrap();

        assert_eq!(first.added_at, second.added_at);
    }

    #[tokio::test]
    async fn bulk_insert_and_query_round_trip() {
        let store = store_with_instrument("AAPL").await;
        let bars = vec![
            bar("AAPL", utc(2024, 1, 1, 9, 30), 10.0),
            bar("AAPL", utc(2024, 1, 1, 9, 35), 10.1),
            bar("AAPL", utc(2024, 1, 1, 9, 40), 10.2),
        ];

        let inserted = store.bulk_insert(&bars).await.unwrap();
        assert_eq!(inserted, 3);

        let fetched = store
            .query("AAPL", utc(2024, 1, 1, 9, 30), utc(2024, 1, 1, 9, 40))
            .await
            .unwrap();
        assert_eq!(fetched, bars);
    }

    #[tokio::test]
    async fn query_bounds_are_inclusive() {
        let store = store_with_instrument("AAPL").await;
        let bars = vec![
            bar("AAPL", utc(2024, 1, 1, 9, 30), 10.0),
            bar("AAPL", utc(2024, 1, 1, 9, 35), 10.1),
            bar("AAPL", utc(2024, 1, 1, 9, 40), 10.2),
        ];
        store.bulk_insert(&bars).await.unwrap();

        let fetched = store
            .query("AAPL", utc(2024, 1, 1, 9, 35), utc(2024, 1, 1, 9, 40))
            .await
            .unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].timestamp, utc(2024, 1, 1, 9, 35));
        assert_eq!(fetched[1].timestamp, utc(2024, 1, 1, 9, 40));
    }

    #[tokio::test]
    async fn duplicate_timestamp_rejected_not_overwritten() {
        let store = store_with_instrument("AAPL").await;
        let original = bar("AAPL", utc(2024, 1, 1, 9, 30), 10.0);
        store.bulk_insert(&[original.clone()]).await.unwrap();

        // Same (symbol, timestamp), different values
        let duplicate = bar("AAPL", utc(2024, 1, 1, 9, 30), 99.0);
        let err = store.bulk_insert(&[duplicate]).await.unwrap_err();
        assert!(matches!(err, StoreError::BulkInsert { batch_size: 1, .. }));

        // Exactly one row remains, with the original values
        let fetched = store
            .query("AAPL", utc(2024, 1, 1, 9, 30), utc(2024, 1, 1, 9, 30))
            .await
            .unwrap();
        assert_eq!(fetched, vec![original]);
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_entirely() {
        let store = store_with_instrument("AAPL").await;
        store
            .bulk_insert(&[bar("AAPL", utc(2024, 1, 1, 9, 30), 10.0)])
            .await
            .unwrap();

        // Batch with one fresh bar and one duplicate: nothing may commit
        let batch = vec![
            bar("AAPL", utc(2024, 1, 1, 9, 35), 10.1),
            bar("AAPL", utc(2024, 1, 1, 9, 30), 10.2),
        ];
        let err = store.bulk_insert(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::BulkInsert { batch_size: 2, .. }));

        assert_eq!(store.count_bars("AAPL").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = store_with_instrument("AAPL").await;
        assert_eq!(store.bulk_insert(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let store = store_with_instrument("AAPL").await;
        let old = bar("AAPL", Utc::now() - Duration::days(40), 10.0);
        let recent = bar("AAPL", Utc::now() - Duration::days(5), 10.1);
        store.bulk_insert(&[old, recent]).await.unwrap();

        let first = store.cleanup_older_than(30).await.unwrap();
        assert_eq!(first, 1);

        let second = store.cleanup_older_than(30).await.unwrap();
        assert_eq!(second, 0);

        assert_eq!(store.count_bars("AAPL").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn touch_advances_last_updated() {
        let store = store_with_instrument("AAPL").await;
        let before = store.get_instrument("AAPL").await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.touch_last_updated("AAPL").await.unwrap();

        let after = store.get_instrument("AAPL").await.unwrap().unwrap();
        assert!(after.last_updated_at > before.last_updated_at);
        assert_eq!(after.added_at, before.added_at);
    }

    #[tokio::test]
    async fn touch_unknown_instrument_fails() {
        let store = BarStore::open_in_memory().await.unwrap();
        let err = store.touch_last_updated("NOPE").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownInstrument(symbol) if symbol == "NOPE"));
    }

    #[tokio::test]
    async fn instruments_with_bars_lists_only_populated_symbols() {
        let store = BarStore::open_in_memory().await.unwrap();
        store.upsert_instrument("AAPL").await.unwrap();
        store.upsert_instrument("MSFT").await.unwrap();
        store
            .bulk_insert(&[bar("AAPL", utc(2024, 1, 1, 9, 30), 10.0)])
            .await
            .unwrap();

        assert_eq!(
            store.instruments_with_bars().await.unwrap(),
            vec!["AAPL".to_string()]
        );
    }
}
