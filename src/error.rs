//! Error taxonomy shared by the store, loader, models and HTTP layer.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing request fields, unsupported algorithm names,
    /// feature mappings that fail strict vectorization.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {found} usable rows, at least {required} required")]
    InsufficientData { found: usize, required: usize },

    #[error("model not trained: {0}")]
    ModelNotTrained(String),

    /// A persisted artifact is missing required keys or cannot be decoded.
    #[error("corrupt model artifact {path}: {reason}")]
    CorruptArtifact { path: String, reason: String },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("no data loaded")]
    NoData,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable name used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::InsufficientData { .. } => "insufficient_data",
            Error::ModelNotTrained(_) => "model_not_trained",
            Error::CorruptArtifact { .. } => "corrupt_artifact",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::NoData => "no_data",
            Error::Database(_) => "database",
            Error::Model(_) => "model",
            Error::Io(_) => "io",
            Error::Csv(_) => "csv",
            Error::Json(_) => "json",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ModelNotTrained(_) => StatusCode::CONFLICT,
            Error::NoData => StatusCode::NOT_FOUND,
            Error::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::CorruptArtifact { .. }
            | Error::Database(_)
            | Error::Model(_)
            | Error::Io(_)
            | Error::Csv(_)
            | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn model(err: impl std::fmt::Display) -> Self {
        Error::Model(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            tracing::warn!(kind = self.kind(), error = %self, "Request rejected");
        }
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "kind": self.kind(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::invalid("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::InsufficientData { found: 3, required: 100 }.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::ModelNotTrained("peak".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::UpstreamUnavailable("timeout".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(Error::NoData.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = Error::InsufficientData { found: 42, required: 100 };
        assert_eq!(
            err.to_string(),
            "insufficient data: 42 usable rows, at least 100 required"
        );
        assert_eq!(err.kind(), "insufficient_data");
    }
}
