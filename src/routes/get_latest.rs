use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::info;

use super::AppState;
use crate::{LatestPrediction, PipelineError};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/node/{node_id}/latest", get(handler))
}

async fn handler(
    Path(node_id): Path<String>,
    State(predictor): State<AppState>,
) -> Result<Json<LatestPrediction>, PipelineError> {
    // ---
    info!("GET /node/{}/latest", node_id);
    let prediction = predictor.predict_latest(&node_id).await?;
    Ok(Json(prediction))
}
