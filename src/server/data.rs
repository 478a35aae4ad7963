use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;

use super::{AppState, parse_body};
use crate::error::{Error, Result};
use crate::loader::{BulkLoader, LoadReport};
use crate::record::{season_name, weather_name};
use crate::store::Distribution;

const DEFAULT_SAMPLE: i64 = 10;
const MAX_SAMPLE: i64 = 1000;

#[derive(Debug, Default, Deserialize)]
struct LoadUrlRequest {
    url: Option<String>,
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SampleQuery {
    limit: Option<i64>,
}

pub(super) async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
    state.store.ping().await?;
    let records = state.store.count().await?;
    Ok(Json(json!({
        "status": "ok",
        "database": "connected",
        "records": records,
    })))
}

/// Accepts either a multipart upload (`file`, optional `batch_size`) or a
/// JSON body naming a `url` to download.
pub(super) async fn load(State(state): State<AppState>, request: Request) -> Result<Json<Value>> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let (source, report) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| Error::invalid(e.body_text()))?;
        load_upload(&state, multipart).await?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| Error::invalid(e.body_text()))?;
        let req: LoadUrlRequest = parse_body(&body)?;
        let url = req.url.ok_or_else(|| {
            Error::invalid("expected a multipart 'file' upload or a JSON body with a 'url'")
        })?;
        let loader = BulkLoader::new(
            state.store.clone(),
            req.batch_size.unwrap_or(state.config.default_batch_size),
        )?;
        let report = loader.load_url(state.client.as_ref(), &url).await?;
        (url, report)
    };

    info!(%source, success = report.success_count, errors = report.error_count, "Dataset loaded");
    let message = if report.partial_failure {
        "Dataset loaded with errors"
    } else {
        "Dataset loaded"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "source": source,
        "data": report,
    })))
}

async fn load_upload(state: &AppState, mut multipart: Multipart) -> Result<(String, LoadReport)> {
    let mut file: Option<(String, Bytes)> = None;
    let mut batch_size = state.config.default_batch_size;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid(e.body_text()))?
    {
        match field.name().map(str::to_owned).as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::invalid(e.body_text()))?;
                file = Some((name, bytes));
            }
            Some("batch_size") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::invalid(e.body_text()))?;
                batch_size = text.trim().parse().map_err(|_| {
                    Error::invalid(format!("batch_size '{text}' is not a positive integer"))
                })?;
            }
            _ => {}
        }
    }

    let (name, bytes) =
        file.ok_or_else(|| Error::invalid("no file provided, upload it in the 'file' field"))?;
    if name.is_empty() {
        return Err(Error::invalid("uploaded file has no name"));
    }
    let lower = name.to_ascii_lowercase();
    if !(lower.ends_with(".csv") || lower.ends_with(".gz")) {
        return Err(Error::invalid(format!(
            "unsupported file '{name}', upload a CSV (optionally gzip-compressed)"
        )));
    }

    let loader = BulkLoader::new(state.store.clone(), batch_size)?;
    let report = loader.load_bytes(&bytes).await?;
    Ok((name, report))
}

pub(super) async fn status(State(state): State<AppState>) -> Result<Json<Value>> {
    let store = &state.store;
    let total = store.count().await?;
    let range = store.date_range().await?;
    let counts = store.count_statistics().await?;
    let weather = named(store.distribution(Distribution::Weather).await?, weather_name);
    let seasons = named(store.distribution(Distribution::Season).await?, season_name);

    Ok(Json(json!({
        "success": true,
        "data": {
            "total_records": total,
            "date_range": range,
            "count_statistics": counts,
            "weather_distribution": weather,
            "season_distribution": seasons,
        },
    })))
}

fn named(
    counts: BTreeMap<i64, i64>,
    name: fn(i64) -> &'static str,
) -> BTreeMap<&'static str, i64> {
    let mut out = BTreeMap::new();
    for (code, n) in counts {
        *out.entry(name(code)).or_insert(0) += n;
    }
    out
}

pub(super) async fn sample(
    State(state): State<AppState>,
    query: std::result::Result<Query<SampleQuery>, QueryRejection>,
) -> Result<Json<Value>> {
    let Query(query) = query.map_err(|e| Error::invalid(e.body_text()))?;
    let limit = query.limit.unwrap_or(DEFAULT_SAMPLE);
    if limit < 1 {
        return Err(Error::invalid(format!("limit must be at least 1, got {limit}")));
    }
    let records = state.store.sample(limit.min(MAX_SAMPLE)).await?;
    Ok(Json(json!({
        "success": true,
        "count": records.len(),
        "data": records,
    })))
}
