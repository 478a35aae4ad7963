use tracing::debug;

use crate::analytics::types::{
    DailyReport, DailyStat, DayTypeComparison, GroupStats, HourlyReport, HourlyStat,
    HourlySummary, SeasonalReport, SeasonalStat, TemperatureBand, WeatherReport, WeatherStat,
    WeatherSummary,
};
use crate::analytics::utility::{mean, percent_change, round2};
use crate::error::{Error, Result};
use crate::record::{TEMP_SCALE, day_name, is_weekend, season_name, weather_description};
use crate::store::RecordStore;

/// Hours at or above this multiple of the overall average are peak hours.
const PEAK_HOUR_FACTOR: f64 = 1.5;
/// Hours at or below this multiple of the overall average are low hours.
const LOW_HOUR_FACTOR: f64 = 0.5;

const HOURLY_SQL: &str = "SELECT hr AS hour,
    AVG(cnt) AS avg_rentals, MIN(cnt) AS min_rentals, MAX(cnt) AS max_rentals,
    SUM(cnt) AS total_rentals, AVG(casual) AS avg_casual,
    AVG(registered) AS avg_registered, COUNT(*) AS sample_count
FROM bike_records GROUP BY hr ORDER BY hr";

const DAILY_SQL: &str = "SELECT weekday,
    AVG(cnt) AS avg_rentals, SUM(cnt) AS total_rentals, COUNT(*) AS sample_count
FROM bike_records GROUP BY weekday ORDER BY weekday";

// `?` is 1 for the weekend group, 0 for weekdays.
const DAY_TYPE_SQL: &str = "SELECT
    COALESCE(AVG(cnt), 0.0) AS avg_rentals, COALESCE(MIN(cnt), 0) AS min_rentals,
    COALESCE(MAX(cnt), 0) AS max_rentals, COALESCE(SUM(cnt), 0) AS total_rentals,
    COUNT(*) AS sample_count
FROM bike_records WHERE (weekday IN (0, 6)) = ?";

const SEASONAL_SQL: &str = "SELECT season,
    AVG(cnt) AS avg_rentals, SUM(cnt) AS total_rentals, AVG(temp) AS avg_temp,
    COUNT(*) AS sample_count
FROM bike_records GROUP BY season ORDER BY season";

const WEATHER_SQL: &str = "SELECT weathersit AS weather_code,
    AVG(cnt) AS avg_rentals, MIN(cnt) AS min_rentals, MAX(cnt) AS max_rentals,
    SUM(cnt) AS total_rentals, AVG(temp) AS avg_temperature, AVG(hum) AS avg_humidity,
    AVG(windspeed) AS avg_windspeed, COUNT(*) AS sample_count
FROM bike_records GROUP BY weathersit ORDER BY weathersit";

const TEMPERATURE_BAND_SQL: &str = "SELECT
    CASE WHEN temp < 0.3 THEN 'cold' WHEN temp < 0.7 THEN 'mild' ELSE 'hot' END
        AS temperature_category,
    AVG(cnt) AS avg_rentals, COUNT(*) AS sample_count
FROM bike_records GROUP BY temperature_category ORDER BY MIN(temp)";

async fn ensure_data(store: &RecordStore) -> Result<()> {
    if store.count().await? == 0 {
        return Err(Error::NoData);
    }
    Ok(())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Rental usage per hour of day, with peak and low hours picked out.
pub async fn hourly(store: &RecordStore) -> Result<HourlyReport> {
    ensure_data(store).await?;
    let mut stats = sqlx::query_as::<_, HourlyStat>(HOURLY_SQL)
        .fetch_all(store.pool())
        .await?;
    for s in &mut stats {
        s.avg_rentals = round2(s.avg_rentals);
        s.avg_casual = round2(s.avg_casual);
        s.avg_registered = round2(s.avg_registered);
    }
    let summary = summarize_hours(&stats)?;
    debug!(hours = stats.len(), "Hourly patterns computed");
    Ok(HourlyReport {
        hourly_patterns: stats,
        summary,
    })
}

fn summarize_hours(stats: &[HourlyStat]) -> Result<HourlySummary> {
    let averages: Vec<f64> = stats.iter().map(|s| s.avg_rentals).collect();
    let overall = mean(&averages);
    let peak = stats
        .iter()
        .max_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?;
    let low = stats
        .iter()
        .min_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?;

    Ok(HourlySummary {
        overall_avg: round2(overall),
        peak_hour: peak.hour,
        low_hour: low.hour,
        peak_hours: stats
            .iter()
            .filter(|s| s.avg_rentals >= overall * PEAK_HOUR_FACTOR)
            .map(|s| s.hour)
            .collect(),
        low_hours: stats
            .iter()
            .filter(|s| s.avg_rentals <= overall * LOW_HOUR_FACTOR)
            .map(|s| s.hour)
            .collect(),
        total_hours_analyzed: stats.len(),
    })
}

/// Per-weekday usage and the weekday/weekend comparison.
pub async fn daily(store: &RecordStore) -> Result<DailyReport> {
    ensure_data(store).await?;
    let mut days = sqlx::query_as::<_, DailyStat>(DAILY_SQL)
        .fetch_all(store.pool())
        .await?;
    for d in &mut days {
        d.avg_rentals = round2(d.avg_rentals);
        d.day_name = day_name(d.weekday).to_string();
        d.day_type = if is_weekend(d.weekday) { "weekend" } else { "weekday" }.to_string();
    }

    let weekday = day_type_stats(store, false).await?;
    let weekend = day_type_stats(store, true).await?;
    let most = days
        .iter()
        .max_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?;
    let least = days
        .iter()
        .min_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?;

    let comparison = DayTypeComparison {
        percentage_difference: round2(percent_change(weekend.avg_rentals, weekday.avg_rentals)),
        weekend_vs_weekday: if weekend.avg_rentals > weekday.avg_rentals {
            "higher"
        } else {
            "lower"
        },
        most_active_day: most.day_name.clone(),
        least_active_day: least.day_name.clone(),
        weekday,
        weekend,
    };
    Ok(DailyReport {
        daily_breakdown: days,
        comparison,
    })
}

async fn day_type_stats(store: &RecordStore, weekend: bool) -> Result<GroupStats> {
    let mut stats = sqlx::query_as::<_, GroupStats>(DAY_TYPE_SQL)
        .bind(weekend)
        .fetch_one(store.pool())
        .await?;
    stats.avg_rentals = round2(stats.avg_rentals);
    Ok(stats)
}

pub async fn seasonal(store: &RecordStore) -> Result<SeasonalReport> {
    ensure_data(store).await?;
    let mut seasons = sqlx::query_as::<_, SeasonalStat>(SEASONAL_SQL)
        .fetch_all(store.pool())
        .await?;
    for s in &mut seasons {
        s.season_name = season_name(s.season).to_string();
        s.avg_rentals = round2(s.avg_rentals);
        s.avg_temp_celsius = round2(s.avg_temp * TEMP_SCALE);
        s.avg_temp = round3(s.avg_temp);
    }
    let best = seasons
        .iter()
        .max_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?
        .season_name
        .clone();
    let worst = seasons
        .iter()
        .min_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?
        .season_name
        .clone();
    Ok(SeasonalReport {
        seasonal_stats: seasons,
        best_season: best,
        worst_season: worst,
    })
}

/// Usage per weather situation and per temperature band.
pub async fn weather(store: &RecordStore) -> Result<WeatherReport> {
    ensure_data(store).await?;
    let mut conditions = sqlx::query_as::<_, WeatherStat>(WEATHER_SQL)
        .fetch_all(store.pool())
        .await?;
    for c in &mut conditions {
        c.weather_name = weather_description(c.weather_code).to_string();
        c.avg_rentals = round2(c.avg_rentals);
        c.avg_temperature = round3(c.avg_temperature);
        c.avg_humidity = round3(c.avg_humidity);
        c.avg_windspeed = round3(c.avg_windspeed);
    }
    let mut bands = sqlx::query_as::<_, TemperatureBand>(TEMPERATURE_BAND_SQL)
        .fetch_all(store.pool())
        .await?;
    for b in &mut bands {
        b.avg_rentals = round2(b.avg_rentals);
    }

    let best = conditions
        .iter()
        .max_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?;
    let worst = conditions
        .iter()
        .min_by(|a, b| a.avg_rentals.total_cmp(&b.avg_rentals))
        .ok_or(Error::NoData)?;
    let summary = WeatherSummary {
        best_weather_condition: best.weather_name.clone(),
        worst_weather_condition: worst.weather_name.clone(),
        weather_impact_percentage: round2(percent_change(best.avg_rentals, worst.avg_rentals)),
        total_weather_conditions: conditions.len(),
    };
    Ok(WeatherReport {
        weather_conditions: conditions,
        temperature_impact: bands,
        summary,
    })
}
