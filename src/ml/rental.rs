//! Hourly rental-count regressor.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::artifact::{Calibration, FittedModel, ModelArtifact};
use super::estimator::{EstimatorConfig, Regressor, TrainableModel, to_matrix};
use super::features::MissingFeaturePolicy;
use super::metrics::{self, TrainingMetrics};
use super::training::{self, select};
use super::{Algorithm, DEMAND_FEATURES, ModelKind, TrainOptions};
use crate::error::Result;
use crate::record::BikeRecord;

fn estimator_config(algorithm: Algorithm) -> EstimatorConfig {
    let config = EstimatorConfig::new(algorithm);
    match algorithm {
        Algorithm::DecisionTree => config.max_depth(15),
        Algorithm::RandomForest => config.max_depth(15).min_samples_split(5),
        _ => config,
    }
}

/// Raw model output as a count: negatives clamp to 0, then round.
pub fn to_count(raw: f64) -> u64 {
    if raw.is_finite() {
        raw.max(0.0).round() as u64
    } else {
        0
    }
}

#[tracing::instrument(skip(records, options), fields(rows = records.len(), cv = options.cross_validate))]
pub fn train(
    algorithm: Algorithm,
    records: &[BikeRecord],
    options: &TrainOptions,
) -> Result<ModelArtifact> {
    let cleaned = training::clean(records, options.min_rows)?;
    let rows = training::feature_rows(&cleaned, DEMAND_FEATURES);
    let targets: Vec<f64> = cleaned.iter().map(|r| r.cnt as f64).collect();
    let config = estimator_config(algorithm);

    let (train_idx, test_idx) = training::split_indices(rows.len());
    let x_train = to_matrix(&select(&rows, &train_idx))?;
    let y_train = select(&targets, &train_idx);
    let x_test = to_matrix(&select(&rows, &test_idx))?;
    let y_test = select(&targets, &test_idx);

    let model = Regressor::fit(&config, &x_train, &y_train)?;
    let pred = model.predict(&x_test)?;
    let mut report = metrics::regression(&y_test, &pred);

    if options.cross_validate {
        match training::cross_validate(&config, &rows, &targets) {
            Ok(cv) => report.cross_validation = Some(cv),
            Err(e) => warn!(error = %e, "Cross-validation failed, omitting"),
        }
    }
    info!(
        rmse = report.rmse,
        mae = report.mae,
        r2 = report.r2_score,
        "Rental count regressor trained"
    );

    Ok(ModelArtifact::new(
        ModelKind::RentalCount,
        algorithm,
        FittedModel::Regressor(model),
        Calibration::None,
        TrainingMetrics::Regression(report),
    ))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RentalPrediction {
    pub predicted_rentals: u64,
    pub model_type: Algorithm,
    pub features_used: Vec<String>,
}

pub fn predict(
    artifact: &ModelArtifact,
    inputs: &[Map<String, Value>],
    policy: MissingFeaturePolicy,
) -> Result<Vec<RentalPrediction>> {
    let model = artifact.regressor()?;
    let x = to_matrix(&artifact.vectorize_all(inputs, policy)?)?;
    Ok(model
        .predict(&x)?
        .into_iter()
        .map(|raw| RentalPrediction {
            predicted_rentals: to_count(raw),
            model_type: artifact.model_type,
            features_used: artifact.feature_names.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_output_clamps_to_zero() {
        assert_eq!(to_count(-3.7), 0);
        assert_eq!(to_count(-0.2), 0);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(to_count(12.49), 12);
        assert_eq!(to_count(12.5), 13);
        assert_eq!(to_count(f64::NAN), 0);
    }

    #[test]
    fn test_hyperparameters() {
        let forest = estimator_config(Algorithm::RandomForest);
        assert_eq!(forest.max_depth, Some(15));
        assert_eq!(forest.min_samples_split, 5);
        assert_eq!(forest.n_trees, 100);
        assert_eq!(estimator_config(Algorithm::LinearRegression).max_depth, None);
    }
}
