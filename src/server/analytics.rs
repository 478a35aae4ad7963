use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde::Serialize;
use serde_json::{Value, json};

use super::{AppState, csv_attachment};
use crate::analytics::{Aggregation, aggregate, export};
use crate::error::Result;

fn envelope<T: Serialize>(data: T, message: &str) -> Result<Json<Value>> {
    Ok(Json(json!({
        "success": true,
        "data": serde_json::to_value(data)?,
        "message": message,
    })))
}

pub(super) async fn hourly(State(state): State<AppState>) -> Result<Json<Value>> {
    envelope(aggregate::hourly(&state.store).await?, "Hourly patterns computed")
}

pub(super) async fn daily(State(state): State<AppState>) -> Result<Json<Value>> {
    envelope(aggregate::daily(&state.store).await?, "Weekday vs weekend comparison computed")
}

pub(super) async fn seasonal(State(state): State<AppState>) -> Result<Json<Value>> {
    envelope(aggregate::seasonal(&state.store).await?, "Seasonal statistics computed")
}

pub(super) async fn weather(State(state): State<AppState>) -> Result<Json<Value>> {
    envelope(aggregate::weather(&state.store).await?, "Weather impact computed")
}

pub(super) async fn export_csv(State(state): State<AppState>) -> Result<Response> {
    let body = export::export_records(&state.store).await?;
    Ok(csv_attachment("bike_sharing_export.csv", body))
}

pub(super) async fn download(
    State(state): State<AppState>,
    Path(aggregation): Path<String>,
) -> Result<Response> {
    let aggregation: Aggregation = aggregation.parse()?;
    let body = export::export_aggregation(&state.store, aggregation).await?;
    Ok(csv_attachment(&aggregation.file_name(), body))
}
