//! The hourly observation record and its CSV row form.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Columns every uploaded dataset must carry, in the UCI `hour.csv` order.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "instant",
    "dteday",
    "season",
    "yr",
    "mnth",
    "hr",
    "holiday",
    "weekday",
    "workingday",
    "weathersit",
    "temp",
    "atemp",
    "hum",
    "windspeed",
    "casual",
    "registered",
    "cnt",
];

// Scale factors used by the source dataset to normalise weather readings.
pub const TEMP_SCALE: f64 = 41.0;
pub const ATEMP_SCALE: f64 = 50.0;
pub const HUM_SCALE: f64 = 100.0;
pub const WINDSPEED_SCALE: f64 = 67.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct BikeRecord {
    pub instant: i64,
    pub dteday: NaiveDate,
    pub season: i64,
    pub yr: i64,
    pub mnth: i64,
    pub hr: i64,
    pub holiday: i64,
    pub weekday: i64,
    pub workingday: i64,
    pub weathersit: i64,
    pub temp: f64,
    pub atemp: f64,
    pub hum: f64,
    pub windspeed: f64,
    pub casual: i64,
    pub registered: i64,
    pub cnt: i64,
}

impl BikeRecord {
    /// Numeric value of a named column, as used by the feature vectorizer.
    pub fn feature(&self, name: &str) -> Option<f64> {
        let v = match name {
            "instant" => self.instant as f64,
            "season" => self.season as f64,
            "yr" => self.yr as f64,
            "mnth" => self.mnth as f64,
            "hr" => self.hr as f64,
            "holiday" => self.holiday as f64,
            "weekday" => self.weekday as f64,
            "workingday" => self.workingday as f64,
            "weathersit" => self.weathersit as f64,
            "temp" => self.temp,
            "atemp" => self.atemp,
            "hum" => self.hum,
            "windspeed" => self.windspeed,
            "casual" => self.casual as f64,
            "registered" => self.registered as f64,
            "cnt" => self.cnt as f64,
            _ => return None,
        };
        Some(v)
    }

    /// False when any weather reading is NaN or infinite.
    pub fn is_complete(&self) -> bool {
        [self.temp, self.atemp, self.hum, self.windspeed]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn temp_celsius(&self) -> f64 {
        self.temp * TEMP_SCALE
    }

    pub fn atemp_celsius(&self) -> f64 {
        self.atemp * ATEMP_SCALE
    }

    pub fn humidity_percent(&self) -> f64 {
        self.hum * HUM_SCALE
    }

    pub fn windspeed_kmh(&self) -> f64 {
        self.windspeed * WINDSPEED_SCALE
    }

    pub fn is_weekend(&self) -> bool {
        is_weekend(self.weekday)
    }
}

pub fn is_weekend(weekday: i64) -> bool {
    weekday == 0 || weekday == 6
}

pub fn season_name(season: i64) -> &'static str {
    match season {
        1 => "Spring",
        2 => "Summer",
        3 => "Fall",
        4 => "Winter",
        _ => "Unknown",
    }
}

pub fn weather_name(weathersit: i64) -> &'static str {
    match weathersit {
        1 => "Clear",
        2 => "Mist",
        3 => "Light_rain",
        4 => "Heavy_rain",
        _ => "Unknown",
    }
}

pub fn weather_description(weathersit: i64) -> &'static str {
    match weathersit {
        1 => "Clear / few clouds",
        2 => "Mist / cloudy",
        3 => "Light snow / light rain",
        4 => "Heavy rain / snow / storm",
        _ => "Unknown",
    }
}

/// Day names indexed by the dataset's weekday code (0 = Sunday).
pub fn day_name(weekday: i64) -> &'static str {
    match weekday {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        _ => "Unknown",
    }
}

/// One CSV row with every cell still as text, so that coercion failures can be
/// reported per row instead of aborting the whole file.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvRow {
    pub instant: String,
    pub dteday: String,
    pub season: String,
    pub yr: String,
    pub mnth: String,
    pub hr: String,
    pub holiday: String,
    pub weekday: String,
    pub workingday: String,
    pub weathersit: String,
    pub temp: String,
    pub atemp: String,
    pub hum: String,
    pub windspeed: String,
    pub casual: String,
    pub registered: String,
    pub cnt: String,
}

impl TryFrom<&CsvRow> for BikeRecord {
    type Error = String;

    fn try_from(row: &CsvRow) -> Result<Self, Self::Error> {
        let record = BikeRecord {
            instant: parse_int("instant", &row.instant)?,
            dteday: NaiveDate::parse_from_str(row.dteday.trim(), "%Y-%m-%d")
                .map_err(|e| format!("dteday '{}': {}", row.dteday, e))?,
            season: parse_int("season", &row.season)?,
            yr: parse_int("yr", &row.yr)?,
            mnth: parse_int("mnth", &row.mnth)?,
            hr: parse_int("hr", &row.hr)?,
            holiday: parse_int("holiday", &row.holiday)?,
            weekday: parse_int("weekday", &row.weekday)?,
            workingday: parse_int("workingday", &row.workingday)?,
            weathersit: parse_int("weathersit", &row.weathersit)?,
            temp: parse_float("temp", &row.temp)?,
            atemp: parse_float("atemp", &row.atemp)?,
            hum: parse_float("hum", &row.hum)?,
            windspeed: parse_float("windspeed", &row.windspeed)?,
            casual: parse_int("casual", &row.casual)?,
            registered: parse_int("registered", &row.registered)?,
            cnt: parse_int("cnt", &row.cnt)?,
        };
        record.validate()?;
        Ok(record)
    }
}

impl BikeRecord {
    fn validate(&self) -> Result<(), String> {
        check_range("season", self.season, 1, 4)?;
        check_range("weathersit", self.weathersit, 1, 4)?;
        check_range("hr", self.hr, 0, 23)?;
        check_range("weekday", self.weekday, 0, 6)?;
        check_range("mnth", self.mnth, 1, 12)?;
        if self.cnt < 0 {
            return Err(format!("cnt {} is negative", self.cnt));
        }
        Ok(())
    }
}

fn check_range(field: &str, value: i64, lo: i64, hi: i64) -> Result<(), String> {
    if value < lo || value > hi {
        return Err(format!("{field} {value} outside {lo}..={hi}"));
    }
    Ok(())
}

// Accepts integral floats such as "3.0", which pandas-exported CSVs contain.
fn parse_int(field: &str, raw: &str) -> Result<i64, String> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Ok(v);
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(format!("{field} '{raw}' is not an integer")),
    }
}

// SQLite stores NaN as NULL, so non-finite readings must not reach the store.
fn parse_float(field: &str, raw: &str) -> Result<f64, String> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("{field} '{raw}' is not a finite number")),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_row() -> CsvRow {
        CsvRow {
            instant: "1".into(),
            dteday: "2011-01-01".into(),
            season: "1".into(),
            yr: "0".into(),
            mnth: "1".into(),
            hr: "0".into(),
            holiday: "0".into(),
            weekday: "6".into(),
            workingday: "0".into(),
            weathersit: "1".into(),
            temp: "0.24".into(),
            atemp: "0.2879".into(),
            hum: "0.81".into(),
            windspeed: "0".into(),
            casual: "3".into(),
            registered: "13".into(),
            cnt: "16".into(),
        }
    }

    #[test]
    fn test_parse_valid_row() {
        let record = BikeRecord::try_from(&sample_row()).unwrap();
        assert_eq!(record.instant, 1);
        assert_eq!(record.dteday, NaiveDate::from_ymd_opt(2011, 1, 1).unwrap());
        assert_eq!(record.cnt, 16);
        assert!(record.is_weekend());
    }

    #[test]
    fn test_parse_integral_float() {
        let mut row = sample_row();
        row.season = "2.0".into();
        assert_eq!(BikeRecord::try_from(&row).unwrap().season, 2);
    }

    #[test]
    fn test_non_numeric_instant_rejected() {
        let mut row = sample_row();
        row.instant = "abc".into();
        let err = BikeRecord::try_from(&row).unwrap_err();
        assert!(err.contains("instant"));
    }

    #[test]
    fn test_non_finite_reading_rejected() {
        for raw in ["NaN", "inf", "-infinity"] {
            let mut row = sample_row();
            row.atemp = raw.into();
            assert!(BikeRecord::try_from(&row).unwrap_err().contains("atemp"));
        }
    }

    #[test]
    fn test_overflowing_integral_float_rejected() {
        let mut row = sample_row();
        row.cnt = "1e30".into();
        assert!(BikeRecord::try_from(&row).unwrap_err().contains("cnt"));
    }

    #[test]
    fn test_bad_date_rejected() {
        let mut row = sample_row();
        row.dteday = "01/01/2011".into();
        assert!(BikeRecord::try_from(&row).is_err());
    }

    #[test]
    fn test_out_of_range_hour_rejected() {
        let mut row = sample_row();
        row.hr = "24".into();
        assert!(BikeRecord::try_from(&row).unwrap_err().contains("hr"));
    }

    #[test]
    fn test_denormalized_readings() {
        let record = BikeRecord::try_from(&sample_row()).unwrap();
        assert!((record.temp_celsius() - 9.84).abs() < 1e-9);
        assert!((record.humidity_percent() - 81.0).abs() < 1e-9);
        assert_eq!(record.windspeed_kmh(), 0.0);
    }

    #[test]
    fn test_feature_lookup() {
        let record = BikeRecord::try_from(&sample_row()).unwrap();
        assert_eq!(record.feature("hr"), Some(0.0));
        assert_eq!(record.feature("temp"), Some(0.24));
        assert_eq!(record.feature("dteday"), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(season_name(3), "Fall");
        assert_eq!(weather_name(4), "Heavy_rain");
        assert_eq!(day_name(0), "Sunday");
        assert!(is_weekend(6));
        assert!(!is_weekend(3));
    }
}
