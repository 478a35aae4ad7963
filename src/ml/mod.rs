//! Model kinds, algorithm variants and the train/predict entry points shared
//! by the three predictors.

pub mod artifact;
pub mod estimator;
pub mod features;
pub mod impact;
pub mod metrics;
pub mod peak;
pub mod rental;
pub mod training;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::record::BikeRecord;
use artifact::ModelArtifact;
use features::MissingFeaturePolicy;
use impact::ImpactPrediction;
use peak::PeakPrediction;
use rental::RentalPrediction;

/// Features used by the rental-count and peak-demand models, in vector order.
pub const DEMAND_FEATURES: &[&str] = &[
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
];

pub const WEATHER_FEATURES: &[&str] = &["weathersit", "temp", "atemp", "hum", "windspeed"];

/// Seed for every shuffle, split and forest in training.
pub const SEED: u64 = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    RentalCount,
    PeakDemand,
    WeatherImpact,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::RentalCount,
        ModelKind::PeakDemand,
        ModelKind::WeatherImpact,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::RentalCount => "rental_count",
            ModelKind::PeakDemand => "peak_demand",
            ModelKind::WeatherImpact => "weather_impact",
        }
    }

    pub fn feature_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::RentalCount | ModelKind::PeakDemand => DEMAND_FEATURES,
            ModelKind::WeatherImpact => WEATHER_FEATURES,
        }
    }

    pub fn algorithms(self) -> &'static [Algorithm] {
        match self {
            ModelKind::RentalCount => &[
                Algorithm::LinearRegression,
                Algorithm::DecisionTree,
                Algorithm::RandomForest,
            ],
            ModelKind::PeakDemand => &[
                Algorithm::LogisticRegression,
                Algorithm::DecisionTree,
                Algorithm::RandomForest,
            ],
            ModelKind::WeatherImpact => &[Algorithm::LinearRegression, Algorithm::RandomForest],
        }
    }

    /// Variant used when a request names none.
    pub fn default_algorithm(self) -> Algorithm {
        match self {
            ModelKind::RentalCount => Algorithm::LinearRegression,
            ModelKind::PeakDemand | ModelKind::WeatherImpact => Algorithm::RandomForest,
        }
    }

    pub fn supports(self, algorithm: Algorithm) -> bool {
        self.algorithms().contains(&algorithm)
    }

    pub fn check(self, algorithm: Algorithm) -> Result<()> {
        if self.supports(algorithm) {
            return Ok(());
        }
        let allowed: Vec<&str> = self.algorithms().iter().map(|a| a.as_str()).collect();
        Err(Error::invalid(format!(
            "model_type '{algorithm}' is not supported for {self}; expected one of: {}",
            allowed.join(", ")
        )))
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rental" | "rental_count" => Ok(ModelKind::RentalCount),
            "peak" | "peak_demand" => Ok(ModelKind::PeakDemand),
            "weather" | "weather_impact" => Ok(ModelKind::WeatherImpact),
            other => Err(Error::invalid(format!("unknown model kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    LinearRegression,
    LogisticRegression,
    DecisionTree,
    RandomForest,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::LinearRegression => "linear_regression",
            Algorithm::LogisticRegression => "logistic_regression",
            Algorithm::DecisionTree => "decision_tree",
            Algorithm::RandomForest => "random_forest",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear_regression" => Ok(Algorithm::LinearRegression),
            "logistic_regression" => Ok(Algorithm::LogisticRegression),
            "decision_tree" => Ok(Algorithm::DecisionTree),
            "random_forest" => Ok(Algorithm::RandomForest),
            other => Err(Error::invalid(format!("unknown model_type '{other}'"))),
        }
    }
}

/// Knobs for one training run.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub min_rows: usize,
    pub cross_validate: bool,
    pub peak_percentile: f64,
}

impl TrainOptions {
    pub fn for_kind(kind: ModelKind, min_rows: usize) -> Self {
        Self {
            min_rows,
            cross_validate: kind == ModelKind::RentalCount,
            peak_percentile: peak::DEFAULT_PERCENTILE,
        }
    }
}

/// Trains `algorithm` for `kind` on a store snapshot. CPU-bound; call from a
/// blocking context.
pub fn train(
    kind: ModelKind,
    algorithm: Algorithm,
    records: &[BikeRecord],
    options: &TrainOptions,
) -> Result<ModelArtifact> {
    kind.check(algorithm)?;
    match kind {
        ModelKind::RentalCount => rental::train(algorithm, records, options),
        ModelKind::PeakDemand => peak::train(algorithm, records, options),
        ModelKind::WeatherImpact => impact::train(algorithm, records, options),
    }
}

/// One served prediction, shaped per model kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Prediction {
    RentalCount(RentalPrediction),
    PeakDemand(PeakPrediction),
    WeatherImpact(ImpactPrediction),
}

impl Prediction {
    /// Output columns for delimited downloads.
    pub fn columns(&self) -> Vec<(&'static str, String)> {
        match self {
            Prediction::RentalCount(p) => vec![
                ("predicted_rentals", p.predicted_rentals.to_string()),
                ("model_type", p.model_type.to_string()),
            ],
            Prediction::PeakDemand(p) => vec![
                ("is_peak", p.is_peak.to_string()),
                ("peak_probability", p.peak_probability.to_string()),
                ("peak_threshold", p.peak_threshold.to_string()),
                ("model_type", p.model_type.to_string()),
            ],
            Prediction::WeatherImpact(p) => vec![
                ("predicted_impact", p.predicted_impact.to_string()),
                ("impact_category", p.impact_category.to_string()),
                (
                    "baseline_expected",
                    p.baseline_expected.map(|v| v.to_string()).unwrap_or_default(),
                ),
                (
                    "expected_rentals",
                    p.expected_rentals.map(|v| v.to_string()).unwrap_or_default(),
                ),
                ("model_type", p.model_type.to_string()),
            ],
        }
    }
}

/// Predicts every input mapping with `artifact`, one result per input.
pub fn predict(
    artifact: &ModelArtifact,
    inputs: &[serde_json::Map<String, serde_json::Value>],
    policy: MissingFeaturePolicy,
) -> Result<Vec<Prediction>> {
    let out = match artifact.kind {
        ModelKind::RentalCount => rental::predict(artifact, inputs, policy)?
            .into_iter()
            .map(Prediction::RentalCount)
            .collect(),
        ModelKind::PeakDemand => peak::predict(artifact, inputs, policy)?
            .into_iter()
            .map(Prediction::PeakDemand)
            .collect(),
        ModelKind::WeatherImpact => impact::predict(artifact, inputs, policy)?
            .into_iter()
            .map(Prediction::WeatherImpact)
            .collect(),
    };
    Ok(out)
}
