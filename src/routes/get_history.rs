use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info};

use super::AppState;
use crate::{HistoryPrediction, HistoryRequest, PipelineError};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/history", get(handler))
}

/// Raw query string. Everything stays a string so that a bad value maps to
/// our own 400 body rather than axum's rejection text.
#[derive(Debug, Deserialize)]
struct HistoryQuery {
    lat: Option<String>,
    lon: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

async fn handler(
    Query(params): Query<HistoryQuery>,
    State(predictor): State<AppState>,
) -> Result<Json<HistoryPrediction>, PipelineError> {
    // ---
    info!("GET /history - {:?}", params);

    let request = parse_request(&params).ok_or_else(|| {
        debug!("GET /history - rejecting parameters");
        PipelineError::InvalidParameters
    })?;

    let prediction = predictor.predict_history(request).await?;
    Ok(Json(prediction))
}

fn parse_request(params: &HistoryQuery) -> Option<HistoryRequest> {
    // ---
    let lat = parse_coordinate(params.lat.as_deref()?, 90.0)?;
    let lon = parse_coordinate(params.lon.as_deref()?, 180.0)?;
    let start = parse_date(params.start.as_deref()?)?;
    let end = parse_date(params.end.as_deref()?)?;

    (start <= end).then_some(HistoryRequest {
        lat,
        lon,
        start,
        end,
    })
}

fn parse_coordinate(raw: &str, limit: f64) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    (value.is_finite() && value.abs() <= limit).then_some(value)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn query(lat: &str, lon: &str, start: &str, end: &str) -> HistoryQuery {
        HistoryQuery {
            lat: Some(lat.into()),
            lon: Some(lon.into()),
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    #[test]
    fn test_parse_valid_request() {
        // ---
        let r = parse_request(&query("30.73", " 78.44", "2025-07-01", "2025-07-01")).unwrap();
        assert_eq!(r.lat, 30.73);
        assert_eq!(r.lon, 78.44);
        assert_eq!(r.start, r.end);
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        // ---
        assert!(parse_request(&query("91", "78", "2025-07-01", "2025-07-02")).is_none());
        assert!(parse_request(&query("30", "NaN", "2025-07-01", "2025-07-02")).is_none());
        assert!(parse_request(&query("30", "78", "2025-02-30", "2025-07-02")).is_none());
        assert!(parse_request(&query("30", "78", "2025-07-02", "2025-07-01")).is_none());

        let missing = HistoryQuery {
            lat: Some("30".into()),
            lon: None,
            start: Some("2025-07-01".into()),
            end: Some("2025-07-02".into()),
        };
        assert!(parse_request(&missing).is_none());
    }
}
