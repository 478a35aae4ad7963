//! SQLite-backed record store.
//!
//! The table is replaced wholesale by each bulk load. Loads hold the write
//! gate for their whole duration; snapshot reads hold it shared, so a training
//! run never observes a half-loaded table and two loads never interleave.

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use crate::analytics::utility::round2;
use crate::error::Result;
use crate::record::BikeRecord;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS bike_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    instant INTEGER NOT NULL UNIQUE,
    dteday TEXT NOT NULL,
    season INTEGER NOT NULL,
    yr INTEGER NOT NULL,
    mnth INTEGER NOT NULL,
    hr INTEGER NOT NULL,
    holiday INTEGER NOT NULL,
    weekday INTEGER NOT NULL,
    workingday INTEGER NOT NULL,
    weathersit INTEGER NOT NULL,
    temp REAL NOT NULL,
    atemp REAL NOT NULL,
    hum REAL NOT NULL,
    windspeed REAL NOT NULL,
    casual INTEGER NOT NULL DEFAULT 0,
    registered INTEGER NOT NULL DEFAULT 0,
    cnt INTEGER NOT NULL DEFAULT 0
)";

const CREATE_DATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_bike_records_dteday ON bike_records (dteday)";

const INSERT_RECORD: &str = "INSERT INTO bike_records (
    instant, dteday, season, yr, mnth, hr, holiday, weekday, workingday,
    weathersit, temp, atemp, hum, windspeed, casual, registered, cnt
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_RECORDS: &str = "SELECT instant, dteday, season, yr, mnth, hr, holiday, weekday,
    workingday, weathersit, temp, atemp, hum, windspeed, casual, registered, cnt
FROM bike_records";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CountStatistics {
    pub average: f64,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
    gate: Arc<RwLock<()>>,
}

impl RecordStore {
    /// Opens (creating if needed) the database at `url` and ensures the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        // Each connection to an in-memory database is its own database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self {
            pool,
            gate: Arc::new(RwLock::new(())),
        };
        store.migrate().await?;
        info!(url, "Record store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_DATE_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Exclusive access for a full-replace load.
    pub async fn write_gate(&self) -> RwLockWriteGuard<'_, ()> {
        if self.gate.try_read().is_err() {
            debug!("Waiting for in-flight load or reads to finish");
        }
        self.gate.write().await
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Deletes every record in one transaction. Caller must hold the write gate.
    pub async fn clear(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM bike_records")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted)
    }

    /// Inserts `records` in one transaction; any failure rolls back the whole
    /// batch. Caller must hold the write gate.
    pub async fn insert_batch(&self, records: &[BikeRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(INSERT_RECORD)
                .bind(r.instant)
                .bind(r.dteday)
                .bind(r.season)
                .bind(r.yr)
                .bind(r.mnth)
                .bind(r.hr)
                .bind(r.holiday)
                .bind(r.weekday)
                .bind(r.workingday)
                .bind(r.weathersit)
                .bind(r.temp)
                .bind(r.atemp)
                .bind(r.hum)
                .bind(r.windspeed)
                .bind(r.casual)
                .bind(r.registered)
                .bind(r.cnt)
                .execute(&mut *tx)
                .await?;
        }
        // Dropping `tx` on the error paths above rolls it back.
        tx.commit().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bike_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn date_range(&self) -> Result<DateRange> {
        let row = sqlx::query("SELECT MIN(dteday) AS start, MAX(dteday) AS end FROM bike_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(DateRange {
            start: parse_date(row.try_get("start")?),
            end: parse_date(row.try_get("end")?),
        })
    }

    pub async fn count_statistics(&self) -> Result<CountStatistics> {
        let row = sqlx::query(
            "SELECT AVG(cnt) AS average, MIN(cnt) AS minimum, MAX(cnt) AS maximum FROM bike_records",
        )
        .fetch_one(&self.pool)
        .await?;
        let average: Option<f64> = row.try_get("average")?;
        Ok(CountStatistics {
            average: round2(average.unwrap_or(0.0)),
            minimum: row.try_get("minimum")?,
            maximum: row.try_get("maximum")?,
        })
    }

    /// Row counts grouped by `column` (only `season` and `weathersit`).
    pub async fn distribution(&self, column: Distribution) -> Result<BTreeMap<i64, i64>> {
        let sql = format!(
            "SELECT {col} AS code, COUNT(*) AS n FROM bike_records GROUP BY {col} ORDER BY {col}",
            col = column.column()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut out = BTreeMap::new();
        for row in rows {
            out.insert(row.try_get("code")?, row.try_get("n")?);
        }
        Ok(out)
    }

    pub async fn sample(&self, limit: i64) -> Result<Vec<BikeRecord>> {
        let sql = format!("{SELECT_RECORDS} ORDER BY instant LIMIT ?");
        let rows = sqlx::query_as::<_, BikeRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Every record ordered by `instant`, read under the shared gate.
    pub async fn snapshot(&self) -> Result<Vec<BikeRecord>> {
        let _guard = self.gate.read().await;
        let sql = format!("{SELECT_RECORDS} ORDER BY instant");
        let rows = sqlx::query_as::<_, BikeRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        debug!(rows = rows.len(), "Snapshot read");
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Distribution {
    Season,
    Weather,
}

impl Distribution {
    fn column(self) -> &'static str {
        match self {
            Distribution::Season => "season",
            Distribution::Weather => "weathersit",
        }
    }
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn memory_store() -> RecordStore {
        RecordStore::connect("sqlite::memory:").await.unwrap()
    }

    pub(crate) fn record(instant: i64, hr: i64, cnt: i64) -> BikeRecord {
        BikeRecord {
            instant,
            dteday: NaiveDate::from_ymd_opt(2011, 1, 1).unwrap()
                + chrono::Duration::days(instant / 24),
            season: 1 + (instant / 24 % 4),
            yr: 0,
            mnth: 1,
            hr,
            holiday: 0,
            weekday: instant / 24 % 7,
            workingday: 1,
            weathersit: 1 + (instant % 3),
            temp: 0.2 + (hr as f64) / 50.0,
            atemp: 0.25,
            hum: 0.6,
            windspeed: 0.1,
            casual: cnt / 4,
            registered: cnt - cnt / 4,
            cnt,
        }
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let store = memory_store().await;
        let records: Vec<_> = (0..10).map(|i| record(i, i % 24, 10 * i)).collect();
        store.insert_batch(&records).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 10);
        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot, records);
    }

    #[tokio::test]
    async fn test_snapshot_waits_for_write_gate() {
        let store = memory_store().await;
        store.insert_batch(&[record(1, 0, 5)]).await.unwrap();

        let gate = store.write_gate().await;
        let reader = store.clone();
        let mut snapshot = tokio::spawn(async move { reader.snapshot().await });
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(100), &mut snapshot).await;
        assert!(blocked.is_err());

        drop(gate);
        let rows = snapshot.await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_instant_rolls_back_batch() {
        let store = memory_store().await;
        store.insert_batch(&[record(1, 0, 5)]).await.unwrap();

        let batch = vec![record(2, 1, 5), record(1, 2, 5)];
        assert!(store.insert_batch(&batch).await.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = memory_store().await;
        store
            .insert_batch(&[record(1, 0, 5), record(2, 1, 6)])
            .await
            .unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_summary_queries() {
        let store = memory_store().await;
        store
            .insert_batch(&[record(0, 0, 10), record(30, 6, 30)])
            .await
            .unwrap();

        let range = store.date_range().await.unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2011, 1, 1));
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2011, 1, 2));

        let stats = store.count_statistics().await.unwrap();
        assert_eq!(stats.average, 20.0);
        assert_eq!(stats.minimum, Some(10));
        assert_eq!(stats.maximum, Some(30));

        let sample = store.sample(1).await.unwrap();
        assert_eq!(sample.len(), 1);
        assert_eq!(sample[0].instant, 0);
    }

    #[tokio::test]
    async fn test_empty_store_summaries() {
        let store = memory_store().await;
        let range = store.date_range().await.unwrap();
        assert_eq!(range.start, None);
        let stats = store.count_statistics().await.unwrap();
        assert_eq!(stats.minimum, None);
        assert!(store.distribution(Distribution::Season).await.unwrap().is_empty());
    }
}
