//! Read-only aggregate statistics over the record store.
//!
//! Grouping happens in SQL; derived values (names, Celsius, summaries) are
//! filled in afterwards. Every aggregation over an empty store is `NoData`.

pub mod aggregate;
pub mod export;
pub mod types;
pub mod utility;

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The aggregations that can be downloaded as CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Hourly,
    Daily,
    Seasonal,
    Weather,
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Hourly => "hourly",
            Aggregation::Daily => "daily",
            Aggregation::Seasonal => "seasonal",
            Aggregation::Weather => "weather",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}_analytics.csv", self.as_str())
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Aggregation::Hourly),
            "daily" => Ok(Aggregation::Daily),
            "seasonal" => Ok(Aggregation::Seasonal),
            "weather" => Ok(Aggregation::Weather),
            other => Err(Error::invalid(format!(
                "unknown aggregation '{other}', expected hourly, daily, seasonal or weather"
            ))),
        }
    }
}
