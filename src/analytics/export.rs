//! CSV renderings of the record table and of each aggregation.

use chrono::NaiveDate;
use csv::Writer;
use serde::Serialize;
use tracing::info;

use crate::analytics::{Aggregation, aggregate};
use crate::error::{Error, Result};
use crate::record::{BikeRecord, season_name, weather_name};
use crate::store::RecordStore;

/// One exported record: the stored columns plus derived, human-readable ones.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    instant: i64,
    dteday: NaiveDate,
    season: i64,
    yr: i64,
    mnth: i64,
    hr: i64,
    holiday: i64,
    weekday: i64,
    workingday: i64,
    weathersit: i64,
    temp: f64,
    atemp: f64,
    hum: f64,
    windspeed: f64,
    casual: i64,
    registered: i64,
    cnt: i64,
    total_users: i64,
    temp_celsius: f64,
    atemp_celsius: f64,
    humidity_percent: f64,
    windspeed_kmh: f64,
    season_name: &'a str,
    weather_name: &'a str,
}

impl From<&BikeRecord> for ExportRow<'static> {
    fn from(r: &BikeRecord) -> Self {
        ExportRow {
            instant: r.instant,
            dteday: r.dteday,
            season: r.season,
            yr: r.yr,
            mnth: r.mnth,
            hr: r.hr,
            holiday: r.holiday,
            weekday: r.weekday,
            workingday: r.workingday,
            weathersit: r.weathersit,
            temp: r.temp,
            atemp: r.atemp,
            hum: r.hum,
            windspeed: r.windspeed,
            casual: r.casual,
            registered: r.registered,
            cnt: r.cnt,
            total_users: r.casual + r.registered,
            temp_celsius: r.temp_celsius(),
            atemp_celsius: r.atemp_celsius(),
            humidity_percent: r.humidity_percent(),
            windspeed_kmh: r.windspeed_kmh(),
            season_name: season_name(r.season),
            weather_name: weather_name(r.weathersit),
        }
    }
}

/// Serializes `rows` to CSV bytes with a header line.
pub fn to_csv<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<Vec<u8>> {
    let mut writer = Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

/// The whole record table as CSV, ordered by `instant`.
pub async fn export_records(store: &RecordStore) -> Result<Vec<u8>> {
    let records = store.snapshot().await?;
    if records.is_empty() {
        return Err(Error::NoData);
    }
    let bytes = to_csv(records.iter().map(ExportRow::from))?;
    info!(rows = records.len(), bytes = bytes.len(), "Exported records");
    Ok(bytes)
}

/// The per-group table of one aggregation as CSV.
pub async fn export_aggregation(store: &RecordStore, aggregation: Aggregation) -> Result<Vec<u8>> {
    match aggregation {
        Aggregation::Hourly => to_csv(aggregate::hourly(store).await?.hourly_patterns),
        Aggregation::Daily => to_csv(aggregate::daily(store).await?.daily_breakdown),
        Aggregation::Seasonal => to_csv(aggregate::seasonal(store).await?.seasonal_stats),
        Aggregation::Weather => to_csv(aggregate::weather(store).await?.weather_conditions),
    }
}
