//! Full-replace bulk ingestion of CSV datasets into the record store.

use flate2::read::GzDecoder;
use serde::Serialize;
use std::io::Read;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fetch::{HttpClient, fetch_bytes};
use crate::record::{BikeRecord, CsvRow, REQUIRED_COLUMNS};
use crate::analytics::utility::round2;
use crate::store::RecordStore;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Outcome of one load. A nonzero `error_count` is a partial failure: it is
/// reported here rather than raised.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadReport {
    pub total_records: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub success_rate: f64,
    pub batch_size: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub deleted_existing: u64,
    pub partial_failure: bool,
}

impl LoadReport {
    fn new(batch_size: usize) -> Self {
        Self {
            total_records: 0,
            success_count: 0,
            error_count: 0,
            success_rate: 0.0,
            batch_size,
            batches: 0,
            failed_batches: 0,
            deleted_existing: 0,
            partial_failure: false,
        }
    }

    fn finish(mut self) -> Self {
        self.success_rate = if self.total_records == 0 {
            0.0
        } else {
            round2(self.success_count as f64 / self.total_records as f64 * 100.0)
        };
        self.partial_failure = self.error_count > 0;
        self
    }
}

pub struct BulkLoader {
    store: RecordStore,
    batch_size: usize,
}

impl BulkLoader {
    pub fn new(store: RecordStore, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::invalid("batch_size must be greater than zero"));
        }
        Ok(Self { store, batch_size })
    }

    /// Downloads a CSV from `url` and loads it.
    pub async fn load_url<C: HttpClient + ?Sized>(
        &self,
        client: &C,
        url: &str,
    ) -> Result<LoadReport> {
        let bytes = fetch_bytes(client, url).await?;
        self.load_bytes(&bytes).await
    }

    /// Replaces the store's contents with the rows of a CSV (plain or gzip).
    ///
    /// Rows that fail coercion are skipped and counted. Valid rows are inserted
    /// in `batch_size` chunks, each in its own transaction; a failing chunk is
    /// rolled back alone and all its rows are counted as failed.
    #[tracing::instrument(skip(self, bytes), fields(bytes = bytes.len(), batch_size = self.batch_size))]
    pub async fn load_bytes(&self, bytes: &[u8]) -> Result<LoadReport> {
        if bytes.is_empty() {
            return Err(Error::invalid("uploaded file is empty"));
        }
        let data = decompress(bytes)?;
        let rows = parse_rows(&data)?;

        let mut report = LoadReport::new(self.batch_size);
        report.total_records = rows.len();
        info!(records = rows.len(), "Parsed dataset");

        let _gate = self.store.write_gate().await;
        report.deleted_existing = self.store.clear().await?;
        info!(deleted = report.deleted_existing, "Cleared existing records");

        for (index, chunk) in rows.chunks(self.batch_size).enumerate() {
            let batch_no = index + 1;
            report.batches += 1;

            let mut records = Vec::with_capacity(chunk.len());
            for parsed in chunk {
                match parsed {
                    Ok(record) => records.push(record.clone()),
                    Err(_) => report.error_count += 1,
                }
            }

            match self.store.insert_batch(&records).await {
                Ok(()) => {
                    report.success_count += records.len();
                    debug!(batch = batch_no, saved = records.len(), "Batch committed");
                }
                Err(e) => {
                    report.error_count += records.len();
                    report.failed_batches += 1;
                    warn!(batch = batch_no, rows = records.len(), error = %e, "Batch rolled back");
                }
            }
        }

        let report = report.finish();
        info!(
            success = report.success_count,
            errors = report.error_count,
            success_rate = report.success_rate,
            "Load complete"
        );
        Ok(report)
    }
}

fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes.to_vec());
    }
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| Error::invalid(format!("invalid gzip data: {e}")))?;
    debug!(compressed = bytes.len(), decompressed = out.len(), "Decompressed upload");
    Ok(out)
}

/// Parses every data row, keeping per-row failures in place so that batch
/// boundaries follow the file's row order.
fn parse_rows(data: &[u8]) -> Result<Vec<std::result::Result<BikeRecord, String>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = rdr
        .headers()
        .map_err(|e| Error::invalid(format!("unreadable CSV header: {e}")))?
        .clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        return Err(Error::invalid(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    let mut rows = Vec::new();
    for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
        let line = i + 2;
        let parsed = result
            .map_err(|e| e.to_string())
            .and_then(|row| BikeRecord::try_from(&row));
        if let Err(reason) = &parsed {
            warn!(line, reason = %reason, "Skipping malformed row");
        }
        rows.push(parsed);
    }
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::tests::memory_store;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    pub(crate) const HEADER: &str = "instant,dteday,season,yr,mnth,hr,holiday,weekday,workingday,weathersit,temp,atemp,hum,windspeed,casual,registered,cnt";

    pub(crate) fn csv_line(instant: i64, hr: i64, cnt: i64) -> String {
        format!(
            "{instant},2011-01-{day:02},1,0,1,{hr},0,{wd},1,{ws},0.{t:02},0.3,0.5,0.1,{c},{r},{cnt}",
            day = 1 + (instant / 24) % 28,
            wd = (instant / 24) % 7,
            ws = 1 + instant % 3,
            t = 20 + hr,
            c = cnt / 5,
            r = cnt - cnt / 5,
        )
    }

    pub(crate) fn csv_with(lines: &[String]) -> String {
        let mut s = String::from(HEADER);
        for l in lines {
            s.push('\n');
            s.push_str(l);
        }
        s.push('\n');
        s
    }

    #[tokio::test]
    async fn test_load_counts_malformed_rows() {
        let store = memory_store().await;
        let mut lines: Vec<String> = (1..=10).map(|i| csv_line(i, i % 24, 10 * i)).collect();
        lines[3] = lines[3].replacen("4,", "four,", 1);
        lines[7] = lines[7].replace("2011-01-01", "not-a-date");

        let loader = BulkLoader::new(store.clone(), 4).unwrap();
        let report = loader.load_bytes(csv_with(&lines).as_bytes()).await.unwrap();

        assert_eq!(report.total_records, 10);
        assert_eq!(report.success_count, 8);
        assert_eq!(report.error_count, 2);
        assert!(report.partial_failure);
        assert_eq!(report.batches, 3);
        assert_eq!(report.success_rate, 80.0);
        assert_eq!(store.count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_duplicate_instant_fails_only_its_batch() {
        let store = memory_store().await;
        let mut lines: Vec<String> = (1..=6).map(|i| csv_line(i, i, 5)).collect();
        // Second batch (rows 4..=6) repeats instant 4.
        lines[5] = csv_line(4, 9, 5);

        let loader = BulkLoader::new(store.clone(), 3).unwrap();
        let report = loader.load_bytes(csv_with(&lines).as_bytes()).await.unwrap();

        assert_eq!(report.success_count, 3);
        assert_eq!(report.error_count, 3);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_finite_reading_skips_only_its_row() {
        let store = memory_store().await;
        let mut lines: Vec<String> = (1..=5).map(|i| csv_line(i, i, 20)).collect();
        lines[2] = lines[2].replacen(",0.3,", ",NaN,", 1);

        let loader = BulkLoader::new(store.clone(), 10).unwrap();
        let report = loader.load_bytes(csv_with(&lines).as_bytes()).await.unwrap();

        assert_eq!(report.success_count, 4);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_loads_do_not_interleave() {
        let store = memory_store().await;
        let first: Vec<String> = (1..=40).map(|i| csv_line(i, i % 24, 3)).collect();
        let second: Vec<String> = (1000..1025).map(|i| csv_line(i, i % 24, 9)).collect();
        let (first, second) = (csv_with(&first), csv_with(&second));

        let a = BulkLoader::new(store.clone(), 7).unwrap();
        let b = BulkLoader::new(store.clone(), 7).unwrap();
        let (ra, rb) = tokio::join!(
            a.load_bytes(first.as_bytes()),
            b.load_bytes(second.as_bytes())
        );
        assert_eq!(ra.unwrap().success_count, 40);
        assert_eq!(rb.unwrap().success_count, 25);

        let instants: Vec<i64> = store
            .snapshot()
            .await
            .unwrap()
            .iter()
            .map(|r| r.instant)
            .collect();
        let only_first: Vec<i64> = (1..=40).collect();
        let only_second: Vec<i64> = (1000..1025).collect();
        assert!(instants == only_first || instants == only_second);
    }

    #[tokio::test]
    async fn test_reload_replaces_existing_rows() {
        let store = memory_store().await;
        let loader = BulkLoader::new(store.clone(), 100).unwrap();

        let first: Vec<String> = (1..=5).map(|i| csv_line(i, i, 1)).collect();
        loader.load_bytes(csv_with(&first).as_bytes()).await.unwrap();
        let second: Vec<String> = (100..102).map(|i| csv_line(i, 1, 1)).collect();
        let report = loader.load_bytes(csv_with(&second).as_bytes()).await.unwrap();

        assert_eq!(report.deleted_existing, 5);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_gzip_upload() {
        let store = memory_store().await;
        let lines: Vec<String> = (1..=3).map(|i| csv_line(i, i, 7)).collect();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(csv_with(&lines).as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();

        let loader = BulkLoader::new(store.clone(), 10).unwrap();
        let report = loader.load_bytes(&gz).await.unwrap();
        assert_eq!(report.success_count, 3);
        assert!(!report.partial_failure);
    }

    #[tokio::test]
    async fn test_missing_columns_rejected() {
        let store = memory_store().await;
        let loader = BulkLoader::new(store, 10).unwrap();
        let err = loader.load_bytes(b"instant,cnt\n1,2\n").await.unwrap_err();
        match err {
            Error::InvalidInput(msg) => assert!(msg.contains("dteday")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_header_rejected() {
        let store = memory_store().await;
        let loader = BulkLoader::new(store, 10).unwrap();
        assert!(matches!(
            loader.load_bytes(b"\xff\xfe x,y\n1,2\n").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let store = memory_store().await;
        let loader = BulkLoader::new(store, 10).unwrap();
        assert!(matches!(
            loader.load_bytes(b"").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let store = rt.block_on(memory_store());
        assert!(BulkLoader::new(store, 0).is_err());
    }
}
