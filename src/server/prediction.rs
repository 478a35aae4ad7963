use axum::Json;
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;

use super::{AppState, csv_attachment, parse_body};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::ml::features::MissingFeaturePolicy;
use crate::ml::{self, Algorithm, ModelKind, Prediction, TrainOptions};

#[derive(Debug, Default, Deserialize)]
struct TrainRequest {
    model_type: Option<String>,
    cross_validate: Option<bool>,
    peak_threshold_percentile: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PredictRequest {
    input_data: Option<Value>,
    model_type: Option<String>,
    zero_fill_missing: Option<bool>,
}

impl PredictRequest {
    fn algorithm(&self) -> Result<Option<Algorithm>> {
        self.model_type.as_deref().map(str::parse::<Algorithm>).transpose()
    }

    fn policy(&self, config: &AppConfig) -> MissingFeaturePolicy {
        MissingFeaturePolicy::from_zero_fill(
            self.zero_fill_missing.unwrap_or(config.zero_fill_missing),
        )
    }

    /// The input mappings; arrays are only accepted when `many` is set.
    fn into_inputs(self, many: bool) -> Result<Vec<Map<String, Value>>> {
        let inputs = match self.input_data {
            None | Some(Value::Null) => return Err(Error::invalid("input_data is required")),
            Some(Value::Object(map)) => vec![map],
            Some(Value::Array(items)) if many => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(Error::invalid(format!(
                        "input_data[{i}] must be an object, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) if many => {
                return Err(Error::invalid("input_data must be an object or an array of objects"));
            }
            Some(_) => return Err(Error::invalid("input_data must be an object")),
        };
        if inputs.is_empty() || inputs.iter().any(Map::is_empty) {
            return Err(Error::invalid("input_data has no fields"));
        }
        Ok(inputs)
    }
}

async fn train(state: AppState, kind: ModelKind, body: Bytes) -> Result<Json<Value>> {
    let req: TrainRequest = parse_body(&body)?;
    let algorithm = match req.model_type.as_deref() {
        Some(name) => name.parse()?,
        None => kind.default_algorithm(),
    };
    kind.check(algorithm)?;

    let mut options = TrainOptions::for_kind(kind, state.config.min_training_rows);
    if let Some(cv) = req.cross_validate {
        options.cross_validate = cv;
    }
    if let Some(p) = req.peak_threshold_percentile {
        options.peak_percentile = p;
    }

    let records = state.store.snapshot().await?;
    info!(%kind, %algorithm, rows = records.len(), "Training requested");
    let registry = Arc::clone(&state.registry);
    let published = tokio::task::spawn_blocking(move || {
        let artifact = ml::train(kind, algorithm, &records, &options)?;
        registry.publish(artifact)
    })
    .await
    .map_err(|e| Error::model(format!("training task failed: {e}")))??;

    Ok(Json(json!({
        "success": true,
        "message": format!("{kind} model trained with {algorithm}"),
        "model": published.info(),
    })))
}

async fn predict(state: AppState, kind: ModelKind, body: Bytes) -> Result<Json<Value>> {
    let req: PredictRequest = parse_body(&body)?;
    let algorithm = req.algorithm()?;
    let policy = req.policy(&state.config);
    let inputs = req.into_inputs(false)?;

    let artifact = state.registry.get(kind, algorithm)?;
    let prediction = ml::predict(&artifact, &inputs, policy)?
        .pop()
        .ok_or_else(|| Error::model("model returned no prediction"))?;
    Ok(Json(json!({
        "success": true,
        "prediction": prediction,
    })))
}

async fn download(state: AppState, kind: ModelKind, body: Bytes) -> Result<Response> {
    let req: PredictRequest = parse_body(&body)?;
    let algorithm = req.algorithm()?;
    let policy = req.policy(&state.config);
    let inputs = req.into_inputs(true)?;

    let artifact = state.registry.get(kind, algorithm)?;
    let predictions = ml::predict(&artifact, &inputs, policy)?;
    let csv = prediction_table(&artifact.feature_names, &inputs, &predictions)?;
    info!(%kind, rows = predictions.len(), "Prediction download");
    Ok(csv_attachment(&format!("{kind}_predictions.csv"), csv))
}

/// One row per input: the model's features as given, then the prediction.
fn prediction_table(
    features: &[String],
    inputs: &[Map<String, Value>],
    predictions: &[Prediction],
) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if let Some(first) = predictions.first() {
        let header = features
            .iter()
            .map(String::as_str)
            .chain(first.columns().into_iter().map(|(name, _)| name));
        writer.write_record(header)?;
    }
    for (input, prediction) in inputs.iter().zip(predictions) {
        let row = features
            .iter()
            .map(|f| cell(input.get(f)))
            .chain(prediction.columns().into_iter().map(|(_, v)| v));
        writer.write_record(row.collect::<Vec<_>>())?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

pub(super) async fn models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "models": state.registry.info(),
    }))
}

pub(super) async fn train_rental(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    train(state, ModelKind::RentalCount, body).await
}

pub(super) async fn train_peak(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    train(state, ModelKind::PeakDemand, body).await
}

pub(super) async fn train_weather(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    train(state, ModelKind::WeatherImpact, body).await
}

pub(super) async fn predict_rental(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    predict(state, ModelKind::RentalCount, body).await
}

pub(super) async fn predict_peak(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    predict(state, ModelKind::PeakDemand, body).await
}

pub(super) async fn predict_weather(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    predict(state, ModelKind::WeatherImpact, body).await
}

pub(super) async fn download_rental(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    download(state, ModelKind::RentalCount, body).await
}

pub(super) async fn download_peak(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    download(state, ModelKind::PeakDemand, body).await
}

pub(super) async fn download_weather(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    download(state, ModelKind::WeatherImpact, body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(input: Value) -> PredictRequest {
        PredictRequest {
            input_data: Some(input),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_prediction_requires_object() {
        assert!(request(json!({"hr": 8})).into_inputs(false).is_ok());
        assert!(request(json!([{"hr": 8}])).into_inputs(false).is_err());
        assert!(PredictRequest::default().into_inputs(false).is_err());
        assert!(request(json!({})).into_inputs(false).is_err());
    }

    #[test]
    fn test_download_accepts_arrays_of_objects() {
        let inputs = request(json!([{"hr": 8}, {"hr": 9}])).into_inputs(true).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(request(json!([{"hr": 8}, 3])).into_inputs(true).is_err());
        assert!(request(json!("hr")).into_inputs(true).is_err());
    }

    #[test]
    fn test_policy_falls_back_to_config() {
        let mut config = AppConfig::default();
        let req = PredictRequest::default();
        assert_eq!(req.policy(&config), MissingFeaturePolicy::Reject);
        config.zero_fill_missing = true;
        assert_eq!(req.policy(&config), MissingFeaturePolicy::ZeroFill);
        let explicit = PredictRequest {
            zero_fill_missing: Some(false),
            ..Default::default()
        };
        assert_eq!(explicit.policy(&config), MissingFeaturePolicy::Reject);
    }

    #[test]
    fn test_unknown_model_type() {
        let req = PredictRequest {
            model_type: Some("svm".into()),
            ..Default::default()
        };
        assert!(matches!(req.algorithm(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_prediction_table_layout() {
        let features = vec!["hr".to_string(), "temp".to_string()];
        let inputs = vec![
            json!({"hr": 8, "temp": 0.5}).as_object().cloned().unwrap(),
            json!({"hr": 9}).as_object().cloned().unwrap(),
        ];
        let predictions = vec![
            Prediction::RentalCount(ml::rental::RentalPrediction {
                predicted_rentals: 120,
                model_type: Algorithm::LinearRegression,
                features_used: features.clone(),
            }),
            Prediction::RentalCount(ml::rental::RentalPrediction {
                predicted_rentals: 0,
                model_type: Algorithm::LinearRegression,
                features_used: features.clone(),
            }),
        ];
        let csv = prediction_table(&features, &inputs, &predictions).unwrap();
        let text = String::from_utf8(csv).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "hr,temp,predicted_rentals,model_type");
        assert_eq!(lines[1], "8,0.5,120,linear_regression");
        assert_eq!(lines[2], "9,,0,linear_regression");
    }
}
