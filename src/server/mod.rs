//! HTTP surface: data ingestion, analytics and model train/predict endpoints.

mod analytics;
mod data;
mod prediction;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::fetch::{BasicClient, HttpClient};
use crate::registry::ModelRegistry;
use crate::store::RecordStore;

/// Shared handles cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub store: RecordStore,
    pub registry: Arc<ModelRegistry>,
    pub config: Arc<AppConfig>,
    pub client: Arc<dyn HttpClient>,
}

impl AppState {
    pub fn new(store: RecordStore, config: AppConfig) -> Self {
        Self {
            store,
            registry: Arc::new(ModelRegistry::new(config.model_dir.clone())),
            config: Arc::new(config),
            client: Arc::new(BasicClient::new()),
        }
    }

    /// Replaces the client used for URL loads.
    pub fn with_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = client;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let max_upload = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(data::health))
        .route("/api/data/load", post(data::load))
        .route("/api/data/status", get(data::status))
        .route("/api/data/sample", get(data::sample))
        .route("/api/analytics/hourly", get(analytics::hourly))
        .route("/api/analytics/mean-rental-by-hour", get(analytics::hourly))
        .route("/api/analytics/daily", get(analytics::daily))
        .route("/api/analytics/weekday-vs-weekend", get(analytics::daily))
        .route("/api/analytics/seasonal", get(analytics::seasonal))
        .route("/api/analytics/weather", get(analytics::weather))
        .route("/api/analytics/weather-impact", get(analytics::weather))
        .route("/api/analytics/export/csv", get(analytics::export_csv))
        .route("/api/analytics/:aggregation/download", get(analytics::download))
        .route("/api/prediction/models", get(prediction::models))
        .route("/api/prediction/train-rental-model", post(prediction::train_rental))
        .route("/api/prediction/train-peak-model", post(prediction::train_peak))
        .route("/api/prediction/train-weather-model", post(prediction::train_weather))
        .route("/api/prediction/predict-rental-count", post(prediction::predict_rental))
        .route("/api/prediction/predict-peak-demand", post(prediction::predict_peak))
        .route("/api/prediction/predict-weather-impact", post(prediction::predict_weather))
        .route(
            "/api/prediction/predict-rental-count/download",
            post(prediction::download_rental),
        )
        .route(
            "/api/prediction/predict-peak-demand/download",
            post(prediction::download_peak),
        )
        .route(
            "/api/prediction/predict-weather-impact/download",
            post(prediction::download_weather),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `addr` and serves until Ctrl+C.
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;
    Ok(())
}

/// Decodes a JSON body, treating an empty body as the type's default.
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| Error::invalid(format!("invalid JSON body: {e}")))
}

/// A CSV body served as a file download.
pub(crate) fn csv_attachment(file_name: &str, body: Vec<u8>) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Body {
        n: Option<u32>,
    }

    #[test]
    fn test_empty_body_is_default() {
        assert_eq!(parse_body::<Body>(&Bytes::from_static(b"")).unwrap(), Body::default());
        assert_eq!(parse_body::<Body>(&Bytes::from_static(b" \n")).unwrap(), Body::default());
        assert_eq!(
            parse_body::<Body>(&Bytes::from_static(br#"{"n": 3}"#)).unwrap(),
            Body { n: Some(3) }
        );
    }

    #[test]
    fn test_malformed_body_is_invalid_input() {
        let err = parse_body::<Body>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_csv_attachment_headers() {
        let resp = csv_attachment("hourly_analytics.csv", b"a,b\n".to_vec());
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"hourly_analytics.csv\""
        );
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/csv")
        );
    }
}
