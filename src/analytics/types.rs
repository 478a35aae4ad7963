//! Response types produced by the aggregation queries.

use serde::Serialize;

/// Usage statistics for one hour of day.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct HourlyStat {
    pub hour: i64,
    pub avg_rentals: f64,
    pub min_rentals: i64,
    pub max_rentals: i64,
    pub total_rentals: i64,
    pub avg_casual: f64,
    pub avg_registered: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlySummary {
    /// Mean of the per-hour averages.
    pub overall_avg: f64,
    pub peak_hour: i64,
    pub low_hour: i64,
    /// Hours averaging at least 1.5× the overall average.
    pub peak_hours: Vec<i64>,
    /// Hours averaging at most 0.5× the overall average.
    pub low_hours: Vec<i64>,
    pub total_hours_analyzed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyReport {
    pub hourly_patterns: Vec<HourlyStat>,
    pub summary: HourlySummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DailyStat {
    pub weekday: i64,
    #[sqlx(skip)]
    pub day_name: String,
    #[sqlx(skip)]
    pub day_type: String,
    pub avg_rentals: f64,
    pub total_rentals: i64,
    pub sample_count: i64,
}

/// Aggregate over either weekdays or weekend days.
#[derive(Debug, Clone, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct GroupStats {
    pub avg_rentals: f64,
    pub min_rentals: i64,
    pub max_rentals: i64,
    pub total_rentals: i64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTypeComparison {
    pub weekday: GroupStats,
    pub weekend: GroupStats,
    /// How much the weekend average exceeds the weekday average, in percent.
    pub percentage_difference: f64,
    pub weekend_vs_weekday: &'static str,
    pub most_active_day: String,
    pub least_active_day: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReport {
    pub daily_breakdown: Vec<DailyStat>,
    pub comparison: DayTypeComparison,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SeasonalStat {
    pub season: i64,
    #[sqlx(skip)]
    pub season_name: String,
    pub avg_rentals: f64,
    pub total_rentals: i64,
    pub avg_temp: f64,
    #[sqlx(skip)]
    pub avg_temp_celsius: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonalReport {
    pub seasonal_stats: Vec<SeasonalStat>,
    pub best_season: String,
    pub worst_season: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WeatherStat {
    pub weather_code: i64,
    #[sqlx(skip)]
    pub weather_name: String,
    pub avg_rentals: f64,
    pub min_rentals: i64,
    pub max_rentals: i64,
    pub total_rentals: i64,
    pub avg_temperature: f64,
    pub avg_humidity: f64,
    pub avg_windspeed: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TemperatureBand {
    /// `cold` below 0.3, `mild` below 0.7, `hot` otherwise (normalised temp).
    pub temperature_category: String,
    pub avg_rentals: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSummary {
    pub best_weather_condition: String,
    pub worst_weather_condition: String,
    /// How much the best condition's average exceeds the worst's, in percent.
    pub weather_impact_percentage: f64,
    pub total_weather_conditions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub weather_conditions: Vec<WeatherStat>,
    pub temperature_impact: Vec<TemperatureBand>,
    pub summary: WeatherSummary,
}
