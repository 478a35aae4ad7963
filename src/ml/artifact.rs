//! Persisted model artifacts.
//!
//! An artifact is one JSON document holding the fitted estimator and all the
//! metadata needed to serve it. Files live at
//! `<model_dir>/<kind>_predictor_<algorithm>.json` and are replaced by writing
//! a temp file and renaming it over the old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::estimator::{Classifier, Regressor};
use super::features::{FeatureVectorizer, MissingFeaturePolicy};
use super::impact::HourlyBaseline;
use super::metrics::TrainingMetrics;
use super::{Algorithm, ModelKind};
use crate::error::{Error, Result};

/// Keys whose absence marks a file as corrupt rather than merely old.
pub const REQUIRED_KEYS: &[&str] = &["model", "model_type", "feature_names", "is_trained"];

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FittedModel {
    Regressor(Regressor),
    Classifier(Classifier),
}

/// Values derived from the training data that prediction depends on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    #[default]
    None,
    PeakThreshold {
        threshold: f64,
        percentile: f64,
    },
    HourlyBaseline(HourlyBaseline),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub kind: ModelKind,
    pub model_type: Algorithm,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub training_metrics: Option<TrainingMetrics>,
    pub is_trained: bool,
    pub created_at: DateTime<Utc>,
    pub model: FittedModel,
}

/// Serving-side summary of an artifact, without the fitted model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub kind: ModelKind,
    pub model_type: Algorithm,
    pub is_trained: bool,
    pub feature_names: Vec<String>,
    pub calibration: Calibration,
    pub training_metrics: Option<TrainingMetrics>,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    pub fn new(
        kind: ModelKind,
        model_type: Algorithm,
        model: FittedModel,
        calibration: Calibration,
        metrics: TrainingMetrics,
    ) -> Self {
        Self {
            kind,
            model_type,
            feature_names: kind.feature_names().iter().map(|s| s.to_string()).collect(),
            calibration,
            training_metrics: Some(metrics),
            is_trained: true,
            created_at: Utc::now(),
            model,
        }
    }

    pub fn file_name(kind: ModelKind, algorithm: Algorithm) -> String {
        format!("{kind}_predictor_{algorithm}.json")
    }

    pub fn path_for(dir: &Path, kind: ModelKind, algorithm: Algorithm) -> PathBuf {
        dir.join(Self::file_name(kind, algorithm))
    }

    /// Writes the artifact atomically and returns its path.
    ///
    /// Each save gets its own temp file in `dir`, so concurrent saves of the
    /// same slot never collide; the last rename wins.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = Self::path_for(dir, self.kind, self.model_type);

        let mut tmp = NamedTempFile::new_in(dir)?;
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        drop(writer);
        tmp.as_file().sync_all()?;

        tmp.persist(&path).map_err(|e| e.error)?;
        info!(path = %path.display(), kind = %self.kind, model_type = %self.model_type, "Saved model artifact");
        Ok(path)
    }

    /// Reads the artifact for `(kind, algorithm)` from `dir`.
    ///
    /// A missing file means the model was never trained; a file that is not
    /// JSON, lacks a required key, or fails to decode is corrupt.
    pub fn load(dir: &Path, kind: ModelKind, algorithm: Algorithm) -> Result<Self> {
        let path = Self::path_for(dir, kind, algorithm);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::ModelNotTrained(format!(
                    "no trained {kind} model for {algorithm}"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let artifact = Self::from_slice(&path, &bytes)?;
        if artifact.kind != kind || artifact.model_type != algorithm {
            return Err(corrupt_at(
                &path,
                format!(
                    "file holds a {} {} model",
                    artifact.kind, artifact.model_type
                ),
            ));
        }
        debug!(path = %path.display(), "Loaded model artifact");
        Ok(artifact)
    }

    pub fn from_slice(path: &Path, bytes: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| corrupt_at(path, e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| corrupt_at(path, "not a JSON object".to_string()))?;
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|k| !object.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(corrupt_at(
                path,
                format!("missing required keys: {}", missing.join(", ")),
            ));
        }
        let artifact: ModelArtifact =
            serde_json::from_value(value).map_err(|e| corrupt_at(path, e.to_string()))?;
        artifact.ensure_trained()?;
        Ok(artifact)
    }

    pub fn ensure_trained(&self) -> Result<()> {
        if self.is_trained {
            Ok(())
        } else {
            Err(Error::ModelNotTrained(format!(
                "{} {} artifact is not trained",
                self.kind, self.model_type
            )))
        }
    }

    pub(crate) fn corrupt(&self, reason: &str) -> Error {
        Error::CorruptArtifact {
            path: Self::file_name(self.kind, self.model_type),
            reason: reason.to_string(),
        }
    }

    pub fn regressor(&self) -> Result<&Regressor> {
        self.ensure_trained()?;
        match &self.model {
            FittedModel::Regressor(m) => Ok(m),
            FittedModel::Classifier(_) => Err(self.corrupt("expected a regressor")),
        }
    }

    pub fn classifier(&self) -> Result<&Classifier> {
        self.ensure_trained()?;
        match &self.model {
            FittedModel::Classifier(m) => Ok(m),
            FittedModel::Regressor(_) => Err(self.corrupt("expected a classifier")),
        }
    }

    /// Vectorizes every input mapping in the artifact's feature order.
    pub fn vectorize_all(
        &self,
        inputs: &[Map<String, Value>],
        policy: MissingFeaturePolicy,
    ) -> Result<Vec<Vec<f64>>> {
        self.ensure_trained()?;
        if inputs.is_empty() {
            return Err(Error::invalid("input_data holds no records"));
        }
        if policy == MissingFeaturePolicy::ZeroFill {
            warn!(kind = %self.kind, "Zero-filling missing features for this request");
        }
        let vectorizer = FeatureVectorizer::new(&self.feature_names);
        inputs
            .iter()
            .map(|m| vectorizer.vectorize_with(m, policy))
            .collect()
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            kind: self.kind,
            model_type: self.model_type,
            is_trained: self.is_trained,
            feature_names: self.feature_names.clone(),
            calibration: self.calibration.clone(),
            training_metrics: self.training_metrics.clone(),
            created_at: self.created_at,
        }
    }
}

fn corrupt_at(path: &Path, reason: String) -> Error {
    Error::CorruptArtifact {
        path: path.display().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::tests::{demand_input, synthetic_records};
    use crate::ml::{TrainOptions, impact, peak, rental, train};

    fn options(kind: ModelKind) -> TrainOptions {
        let mut o = TrainOptions::for_kind(kind, 100);
        o.cross_validate = false;
        o
    }

    #[test]
    fn test_concurrent_saves_of_one_slot_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let kind = ModelKind::RentalCount;
        let artifact =
            train(kind, Algorithm::DecisionTree, &synthetic_records(240), &options(kind)).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10 {
                        artifact.save(dir.path()).unwrap();
                    }
                });
            }
        });

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let loaded = ModelArtifact::load(dir.path(), kind, Algorithm::DecisionTree).unwrap();
        assert_eq!(loaded.created_at, artifact.created_at);
    }

    #[test]
    fn test_rental_round_trip_reproduces_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(240);
        let kind = ModelKind::RentalCount;
        let artifact = train(kind, Algorithm::LinearRegression, &records, &options(kind)).unwrap();
        let path = artifact.save(dir.path()).unwrap();
        assert!(path.ends_with("rental_count_predictor_linear_regression.json"));

        let loaded = ModelArtifact::load(dir.path(), kind, Algorithm::LinearRegression).unwrap();
        let inputs = vec![demand_input(8, 0.5), demand_input(3, 0.2)];
        let policy = MissingFeaturePolicy::Reject;
        assert_eq!(
            rental::predict(&artifact, &inputs, policy).unwrap(),
            rental::predict(&loaded, &inputs, policy).unwrap()
        );
        assert_eq!(loaded.feature_names, artifact.feature_names);
        assert_eq!(loaded.created_at, artifact.created_at);
    }

    #[test]
    fn test_peak_round_trip_keeps_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(240);
        let kind = ModelKind::PeakDemand;
        let artifact = train(kind, Algorithm::DecisionTree, &records, &options(kind)).unwrap();
        artifact.save(dir.path()).unwrap();
        let loaded = ModelArtifact::load(dir.path(), kind, Algorithm::DecisionTree).unwrap();

        assert_eq!(loaded.calibration, artifact.calibration);
        let inputs = vec![demand_input(17, 0.6)];
        let policy = MissingFeaturePolicy::Reject;
        assert_eq!(
            peak::predict(&artifact, &inputs, policy).unwrap(),
            peak::predict(&loaded, &inputs, policy).unwrap()
        );
    }

    #[test]
    fn test_impact_round_trip_keeps_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let records = synthetic_records(240);
        let kind = ModelKind::WeatherImpact;
        let artifact =
            train(kind, Algorithm::LinearRegression, &records, &options(kind)).unwrap();
        artifact.save(dir.path()).unwrap();
        let loaded =
            ModelArtifact::load(dir.path(), kind, Algorithm::LinearRegression).unwrap();

        assert_eq!(loaded.calibration, artifact.calibration);
        let inputs = vec![demand_input(9, 0.4)];
        let policy = MissingFeaturePolicy::Reject;
        assert_eq!(
            impact::predict(&artifact, &inputs, policy).unwrap(),
            impact::predict(&loaded, &inputs, policy).unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_not_trained() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelArtifact::load(dir.path(), ModelKind::PeakDemand, Algorithm::RandomForest)
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotTrained(_)));
    }

    #[test]
    fn test_missing_required_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            ModelArtifact::path_for(dir.path(), ModelKind::RentalCount, Algorithm::RandomForest);
        fs::write(
            &path,
            r#"{"model_type": "random_forest", "feature_names": [], "is_trained": true}"#,
        )
        .unwrap();
        let err = ModelArtifact::load(dir.path(), ModelKind::RentalCount, Algorithm::RandomForest)
            .unwrap_err();
        match err {
            Error::CorruptArtifact { reason, .. } => assert!(reason.contains("model")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let path = Path::new("x.json");
        assert!(matches!(
            ModelArtifact::from_slice(path, b"\x00not json"),
            Err(Error::CorruptArtifact { .. })
        ));
        assert!(matches!(
            ModelArtifact::from_slice(path, b"[1, 2]"),
            Err(Error::CorruptArtifact { .. })
        ));
        let undecodable = br#"{"model": 1, "model_type": "random_forest", "feature_names": [], "is_trained": true}"#;
        assert!(matches!(
            ModelArtifact::from_slice(path, undecodable),
            Err(Error::CorruptArtifact { .. })
        ));
    }

    #[test]
    fn test_empty_input_rejected() {
        let records = synthetic_records(240);
        let kind = ModelKind::RentalCount;
        let artifact = train(kind, Algorithm::LinearRegression, &records, &options(kind)).unwrap();
        assert!(matches!(
            artifact.vectorize_all(&[], MissingFeaturePolicy::ZeroFill),
            Err(Error::InvalidInput(_))
        ));
    }
}
