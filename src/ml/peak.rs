//! Peak-demand labeling and the peak classifier.
//!
//! An hour is a peak when its total count exceeds a threshold calibrated on
//! the historical counts: the requested percentile, but never less than
//! `1.2 × mean` so that a flat distribution does not mark most hours as peaks.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::artifact::{Calibration, FittedModel, ModelArtifact};
use super::estimator::{Classifier, EstimatorConfig, TrainableModel, to_matrix};
use super::features::MissingFeaturePolicy;
use super::metrics::{self, TrainingMetrics};
use super::training::{self, select};
use super::{Algorithm, DEMAND_FEATURES, ModelKind, TrainOptions};
use crate::analytics::utility::mean;
use crate::error::{Error, Result};
use crate::record::BikeRecord;

pub const DEFAULT_PERCENTILE: f64 = 80.0;
pub const MEAN_FLOOR_FACTOR: f64 = 1.2;

#[derive(Debug, Clone)]
pub struct PeakLabeler {
    percentile: f64,
    threshold: Option<f64>,
}

impl Default for PeakLabeler {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTILE)
    }
}

impl PeakLabeler {
    pub fn new(percentile: f64) -> Self {
        Self {
            percentile,
            threshold: None,
        }
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// `max(percentile(counts), mean(counts) * 1.2)`, remembered for labeling.
    pub fn calculate_threshold(&mut self, counts: &[i64]) -> Result<f64> {
        if counts.is_empty() {
            return Err(Error::invalid("cannot calibrate a peak threshold on zero counts"));
        }
        if !(self.percentile > 0.0 && self.percentile <= 100.0) {
            return Err(Error::invalid(format!(
                "peak_threshold_percentile {} outside (0, 100]",
                self.percentile
            )));
        }
        let values: Vec<f64> = counts.iter().map(|c| *c as f64).collect();
        let raw = percentile(&values, self.percentile);
        let floor = mean(&values) * MEAN_FLOOR_FACTOR;
        let threshold = if raw < floor {
            warn!(
                percentile = self.percentile,
                raw,
                floor,
                "Percentile threshold below mean floor, using floor"
            );
            floor
        } else {
            raw
        };
        self.threshold = Some(threshold);
        Ok(threshold)
    }

    /// 1 for every count strictly above the threshold, computing the threshold
    /// from `counts` first if none is set.
    pub fn label(&mut self, counts: &[i64]) -> Result<Vec<i32>> {
        let threshold = match self.threshold {
            Some(t) => t,
            None => self.calculate_threshold(counts)?,
        };
        Ok(counts
            .iter()
            .map(|c| i32::from(*c as f64 > threshold))
            .collect())
    }
}

/// Linear interpolation between closest ranks, `rank = p/100 · (n − 1)`.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

fn estimator_config(algorithm: Algorithm) -> EstimatorConfig {
    let config = EstimatorConfig::new(algorithm);
    match algorithm {
        Algorithm::DecisionTree | Algorithm::RandomForest => {
            config.max_depth(10).min_samples_split(10)
        }
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
    let counts: Vec<i64> = cleaned.iter().map(|r| r.cnt).collect();

    let mut labeler = PeakLabeler::new(options.peak_percentile);
    let threshold = labeler.calculate_threshold(&counts)?;
    let labels = labeler.label(&counts)?;
    let positives = labels.iter().filter(|l| **l == 1).count();
    info!(threshold, positives, total = labels.len(), "Labelled peak hours");
    if positives == 0 || positives == labels.len() {
        return Err(Error::model(format!(
            "peak threshold {threshold:.2} leaves a single class; cannot fit a classifier"
        )));
    }

    let rows = training::feature_rows(&cleaned, DEMAND_FEATURES);
    let (train_idx, test_idx) = training::stratified_split(&labels);
    let train_idx = if algorithm == Algorithm::RandomForest {
        training::oversample_minority(&train_idx, &labels)
    } else {
        train_idx
    };
    let x_train = to_matrix(&select(&rows, &train_idx))?;
    let y_train = select(&labels, &train_idx);
    let x_test = to_matrix(&select(&rows, &test_idx))?;
    let y_test = select(&labels, &test_idx);

    let model = Classifier::fit(&estimator_config(algorithm), &x_train, &y_train)?;
    let pred = model.predict(&x_test)?;
    let scores = model
        .predict_probability(&x_test)?
        .unwrap_or_else(|| pred.iter().map(|p| f64::from(*p)).collect());
    let report = metrics::classification(&y_test, &pred, &scores);
    info!(
        accuracy = report.accuracy,
        f1 = report.f1_score,
        roc_auc = report.roc_auc,
        "Peak classifier trained"
    );

    Ok(ModelArtifact::new(
        ModelKind::PeakDemand,
        algorithm,
        FittedModel::Classifier(model),
        Calibration::PeakThreshold {
            threshold,
            percentile: labeler.percentile(),
        },
        TrainingMetrics::Classification(report),
    ))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PeakPrediction {
    pub is_peak: bool,
    pub peak_probability: f64,
    pub peak_threshold: f64,
    pub model_type: Algorithm,
    pub features_used: Vec<String>,
}

pub fn predict(
    artifact: &ModelArtifact,
    inputs: &[Map<String, Value>],
    policy: MissingFeaturePolicy,
) -> Result<Vec<PeakPrediction>> {
    let model = artifact.classifier()?;
    let Calibration::PeakThreshold { threshold, .. } = artifact.calibration else {
        return Err(artifact.corrupt("peak model carries no threshold"));
    };
    let x = to_matrix(&artifact.vectorize_all(inputs, policy)?)?;
    let labels = model.predict(&x)?;
    let probabilities = model.predict_probability(&x)?;

    Ok(labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            let is_peak = *label == 1;
            let probability = probabilities
                .as_ref()
                .map(|p| p[i])
                .unwrap_or(if is_peak { 1.0 } else { 0.0 });
            PeakPrediction {
                is_peak,
                peak_probability: probability.clamp(0.0, 1.0),
                peak_threshold: threshold,
                model_type: artifact.model_type,
                features_used: artifact.feature_names.clone(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_wins_on_skewed_counts() {
        let counts = [10, 10, 10, 10, 10, 10, 10, 100];
        let mut labeler = PeakLabeler::new(80.0);
        let threshold = labeler.calculate_threshold(&counts).unwrap();
        assert!((threshold - 25.5).abs() < 1e-9);
        assert_eq!(
            labeler.label(&counts).unwrap(),
            vec![0, 0, 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&v, 50.0), 3.0);
        assert!((percentile(&v, 80.0) - 4.2).abs() < 1e-9);
        assert_eq!(percentile(&v, 100.0), 5.0);
        assert_eq!(percentile(&[7.0], 80.0), 7.0);
    }

    #[test]
    fn test_threshold_never_below_floor() {
        let samples: [&[i64]; 4] = [
            &[0],
            &[5, 5, 5, 5],
            &[1, 2, 3, 1000],
            &[0, 0, 0, 0, 1, 400, 3, 9, 27, 81],
        ];
        for counts in samples {
            for p in [1.0, 25.0, 50.0, 80.0, 99.0, 100.0] {
                let m = counts.iter().sum::<i64>() as f64 / counts.len() as f64;
                let t = PeakLabeler::new(p).calculate_threshold(counts).unwrap();
                assert!(t >= m * MEAN_FLOOR_FACTOR - 1e-9, "p={p} counts={counts:?}");
            }
        }
    }

    #[test]
    fn test_peak_count_non_increasing_in_percentile() {
        let counts: Vec<i64> = (0..200).map(|i| (i * 37) % 151).collect();
        let mut previous = usize::MAX;
        for p in (1..=100).map(f64::from) {
            let ones = PeakLabeler::new(p)
                .label(&counts)
                .unwrap()
                .iter()
                .filter(|l| **l == 1)
                .count();
            assert!(ones <= previous);
            previous = ones;
        }
    }

    #[test]
    fn test_label_marks_strictly_greater() {
        let mut labeler = PeakLabeler::new(50.0);
        labeler.threshold = Some(20.0);
        assert_eq!(labeler.label(&[19, 20, 21]).unwrap(), vec![0, 0, 1]);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            PeakLabeler::new(80.0).calculate_threshold(&[]),
            Err(Error::InvalidInput(_))
        ));
        assert!(PeakLabeler::new(0.0).calculate_threshold(&[1, 2]).is_err());
        assert!(PeakLabeler::new(120.0).calculate_threshold(&[1, 2]).is_err());
    }
}
