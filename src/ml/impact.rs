//! Weather impact: how far an hour's count deviates from the usual count for
//! that hour of day, and a regressor predicting that deviation from weather.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::artifact::{Calibration, FittedModel, ModelArtifact};
use super::estimator::{EstimatorConfig, Regressor, TrainableModel, to_matrix};
use super::features::MissingFeaturePolicy;
use super::metrics::{self, TrainingMetrics};
use super::training::{self, select};
use super::{Algorithm, ModelKind, TrainOptions, WEATHER_FEATURES};
use crate::error::{Error, Result};
use crate::record::BikeRecord;

/// Mean total count per hour of day. Built once from a training split and
/// persisted with the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HourlyBaseline(BTreeMap<i64, f64>);

impl HourlyBaseline {
    pub fn compute<'a>(records: impl IntoIterator<Item = &'a BikeRecord>) -> Self {
        let mut sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
        for r in records {
            let entry = sums.entry(r.hr).or_default();
            entry.0 += r.cnt as f64;
            entry.1 += 1;
        }
        Self(
            sums.into_iter()
                .map(|(hr, (sum, n))| (hr, sum / n as f64))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, hr: i64) -> Option<f64> {
        self.0.get(&hr).copied()
    }

    /// Baseline for `hr`; an hour never seen in training is an input error.
    pub fn expected(&self, hr: i64) -> Result<f64> {
        self.get(hr).ok_or_else(|| {
            Error::invalid(format!("hour {hr} has no baseline in the trained model"))
        })
    }

    pub fn score(&self, record: &BikeRecord) -> Result<f64> {
        Ok(impact_score(record.cnt as f64, self.expected(record.hr)?))
    }
}

impl FromIterator<(i64, f64)> for HourlyBaseline {
    fn from_iter<I: IntoIterator<Item = (i64, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// `(count − baseline) / (baseline + 1)`; 0 means exactly average.
pub fn impact_score(count: f64, baseline: f64) -> f64 {
    (count - baseline) / (baseline + 1.0)
}

/// Inverse of [`impact_score`]: the count a score corresponds to.
pub fn expected_count(score: f64, baseline: f64) -> f64 {
    baseline + score * (baseline + 1.0)
}

fn estimator_config(algorithm: Algorithm) -> EstimatorConfig {
    let config = EstimatorConfig::new(algorithm);
    match algorithm {
        Algorithm::RandomForest => config.max_depth(12),
        _ => config,
    }
}

#[tracing::instrument(skip(records, options), fields(rows = records.len()))]
pub fn train(
    algorithm: Algorithm,
    records: &[BikeRecord],
    options: &TrainOptions,
) -> Result<ModelArtifact> {
    let cleaned = training::clean(records, options.min_rows)?;
    let (train_idx, test_idx) = training::split_indices(cleaned.len());
    let train_records = select(&cleaned, &train_idx);
    let baseline = HourlyBaseline::compute(train_records.iter().copied());
    info!(hours = baseline.len(), "Computed hourly baseline");

    let mut test_records = Vec::with_capacity(test_idx.len());
    for r in select(&cleaned, &test_idx) {
        if baseline.get(r.hr).is_some() {
            test_records.push(r);
        } else {
            warn!(hr = r.hr, "Test row hour absent from training baseline, skipped");
        }
    }
    if test_records.is_empty() {
        return Err(Error::model(
            "no test row shares an hour with the training split",
        ));
    }

    let targets = |rows: &[&BikeRecord]| -> Result<Vec<f64>> {
        rows.iter().map(|r| baseline.score(r)).collect()
    };
    let x_train = to_matrix(&training::feature_rows(&train_records, WEATHER_FEATURES))?;
    let y_train = targets(&train_records)?;
    let x_test = to_matrix(&training::feature_rows(&test_records, WEATHER_FEATURES))?;
    let y_test = targets(&test_records)?;

    let model = Regressor::fit(&estimator_config(algorithm), &x_train, &y_train)?;
    let pred = model.predict(&x_test)?;
    let report = metrics::impact(&y_test, &pred);
    info!(
        rmse = report.rmse,
        r2 = report.r2_score,
        impact_accuracy = report.impact_accuracy,
        "Weather impact regressor trained"
    );

    Ok(ModelArtifact::new(
        ModelKind::WeatherImpact,
        algorithm,
        FittedModel::Regressor(model),
        Calibration::HourlyBaseline(baseline),
        TrainingMetrics::Impact(report),
    ))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImpactPrediction {
    pub predicted_impact: f64,
    /// `positive`, `negative` or `neutral`.
    pub impact_category: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_expected: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_rentals: Option<f64>,
    pub model_type: Algorithm,
    pub features_used: Vec<String>,
}

fn category(score: f64) -> &'static str {
    match metrics::impact_band(score) {
        1 => "positive",
        -1 => "negative",
        _ => "neutral",
    }
}

/// Hour named by the mapping, if any. It must be an integral number.
fn requested_hour(mapping: &Map<String, Value>) -> Result<Option<i64>> {
    match mapping.get("hr") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|h| h.fract() == 0.0)
            .map(|h| Some(h as i64))
            .ok_or_else(|| Error::invalid(format!("hr must be an integer hour, got {v}"))),
    }
}

pub fn predict(
    artifact: &ModelArtifact,
    inputs: &[Map<String, Value>],
    policy: MissingFeaturePolicy,
) -> Result<Vec<ImpactPrediction>> {
    let model = artifact.regressor()?;
    let Calibration::HourlyBaseline(baseline) = &artifact.calibration else {
        return Err(artifact.corrupt("weather impact model carries no hourly baseline"));
    };
    let x = to_matrix(&artifact.vectorize_all(inputs, policy)?)?;
    let scores = model.predict(&x)?;

    inputs
        .iter()
        .zip(scores)
        .map(|(mapping, score)| {
            let baseline_expected = requested_hour(mapping)?
                .map(|hr| baseline.expected(hr))
                .transpose()?;
            Ok(ImpactPrediction {
                predicted_impact: score,
                impact_category: category(score),
                baseline_expected,
                expected_rentals: baseline_expected.map(|b| expected_count(score, b)),
                model_type: artifact.model_type,
                features_used: artifact.feature_names.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;

    #[test]
    fn test_score_above_baseline() {
        let baseline: HourlyBaseline = [(14, 200.0)].into_iter().collect();
        let r = record(1, 14, 250);
        let score = baseline.score(&r).unwrap();
        assert!((score - 50.0 / 201.0).abs() < 1e-12);
        assert!((score - 0.2488).abs() < 1e-4);
        assert_eq!(metrics::impact_band(score), 1);
        assert_eq!(category(score), "positive");
    }

    #[test]
    fn test_score_sign_tracks_deviation() {
        let baseline: HourlyBaseline = [(8, 120.0)].into_iter().collect();
        for cnt in [0, 60, 119, 120, 121, 500] {
            let s = baseline.score(&record(1, 8, cnt)).unwrap();
            assert_eq!(s == 0.0, cnt == 120);
            assert_eq!(s > 0.0, cnt > 120);
            assert_eq!(s < 0.0, cnt < 120);
        }
    }

    #[test]
    fn test_zero_baseline_is_finite() {
        assert_eq!(impact_score(3.0, 0.0), 3.0);
    }

    #[test]
    fn test_unseen_hour_is_an_error() {
        let baseline: HourlyBaseline = [(14, 200.0)].into_iter().collect();
        let err = baseline.score(&record(1, 3, 10)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_compute_means_per_hour() {
        let records = vec![record(1, 7, 10), record(2, 7, 30), record(3, 9, 5)];
        let baseline = HourlyBaseline::compute(&records);
        assert_eq!(baseline.get(7), Some(20.0));
        assert_eq!(baseline.get(9), Some(5.0));
        assert_eq!(baseline.len(), 2);
    }

    #[test]
    fn test_expected_count_inverts_score() {
        let s = impact_score(250.0, 200.0);
        assert!((expected_count(s, 200.0) - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_requested_hour_parsing() {
        let m = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(requested_hour(&m(serde_json::json!({}))).unwrap(), None);
        assert_eq!(
            requested_hour(&m(serde_json::json!({"hr": 14}))).unwrap(),
            Some(14)
        );
        assert!(requested_hour(&m(serde_json::json!({"hr": "noon"}))).is_err());
        assert!(requested_hour(&m(serde_json::json!({"hr": 1.5}))).is_err());
    }
}
