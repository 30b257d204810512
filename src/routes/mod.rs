use std::{any::Any, sync::Arc};

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::Predictor;

mod get_history;
mod get_latest;
mod health;

// ---

/// Shared, read-only state handed to every handler.
pub type AppState = Arc<Predictor>;

pub fn router(predictor: AppState) -> Router {
    // ---
    Router::new()
        .merge(get_latest::router())
        .merge(get_history::router())
        .merge(health::router())
        .with_state(predictor)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// A panicking handler still answers with the JSON error shape.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    // ---
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!("Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        json!({ "error": detail }).to_string(),
    )
        .into_response()
}
