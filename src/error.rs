//! Request-level failures and their HTTP mapping.
//!
//! Only failures that end a request live here. Degradations (missing model,
//! missing scaler, failed optional upstream) and side-effect failures are
//! logged where they happen and never reach this type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

// ---

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // ---
    #[error("Invalid node")]
    InvalidNode,

    #[error("Invalid parameters")]
    InvalidParameters,

    /// The mandatory sensor read produced nothing.
    #[error("No sensor data")]
    SensorUnavailable,

    /// The weather archive returned no data, or too little of it.
    #[error("{0}")]
    DataUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        // ---
        match self {
            PipelineError::InvalidNode
            | PipelineError::InvalidParameters
            | PipelineError::DataUnavailable(_) => StatusCode::BAD_REQUEST,
            PipelineError::SensorUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {:#}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
