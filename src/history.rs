//! Hourly feature history from the weather archive.
//!
//! The archive returns one array per variable with nulls where it has no
//! sample. Each column is gap-filled independently, in a fixed order:
//! linear interpolation between known samples, then forward fill, then
//! backward fill. A column with no sample at all ends up as zeros.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::{FeatureRow, FEATURE_NAMES, WINDOW_LEN};

// ---

/// Rows of history the live pipeline asks for; the live row completes the window.
pub const LIVE_HISTORY_ROWS: usize = WINDOW_LEN - 1;

const RANGE_TIMEOUT: Duration = Duration::from_secs(15);
const RECENT_TIMEOUT: Duration = Duration::from_secs(6);

pub const NO_DATA: &str = "No weather data returned.";

/// Source of hourly feature history for a coordinate.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Every hourly row between two dates, inclusive, gap-filled.
    async fn fetch_range(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FeatureRow>, PipelineError>;

    /// The [`LIVE_HISTORY_ROWS`] hourly rows leading up to `now`.
    async fn fetch_recent(
        &self,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>, PipelineError>;
}

/// Open-Meteo archive client.
#[derive(Clone)]
pub struct ArchiveClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    hourly: Option<ArchiveHourly>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArchiveHourly {
    time: Vec<String>,
    surface_pressure: Vec<Option<f64>>,
    rain: Vec<Option<f64>>,
    temperature_2m: Vec<Option<f64>>,
    relative_humidity_2m: Vec<Option<f64>>,
    dew_point_2m: Vec<Option<f64>>,
    cloud_cover: Vec<Option<f64>>,
    wind_direction_10m: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
}

impl ArchiveClient {
    // ---
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
        timeout: Duration,
    ) -> Result<Vec<FeatureRow>, PipelineError> {
        // ---
        let url = format!(
            "{}?latitude={}&longitude={}&start_date={}&end_date={}&hourly={}",
            self.base_url,
            lat,
            lon,
            start,
            end,
            FEATURE_NAMES.join(",")
        );
        tracing::debug!("Fetching weather history: {}", url);

        let response: ArchiveResponse = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::DataUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| PipelineError::DataUnavailable(e.to_string()))?;

        let hourly = response
            .hourly
            .ok_or_else(|| PipelineError::DataUnavailable(NO_DATA.to_string()))?;
        let rows = hourly_to_rows(hourly);
        if rows.is_empty() {
            return Err(PipelineError::DataUnavailable(NO_DATA.to_string()));
        }

        tracing::debug!("Weather history returned {} rows", rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl HistorySource for ArchiveClient {
    // ---
    async fn fetch_range(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FeatureRow>, PipelineError> {
        self.fetch(lat, lon, start, end, RANGE_TIMEOUT).await
    }

    async fn fetch_recent(
        &self,
        lat: f64,
        lon: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<FeatureRow>, PipelineError> {
        // ---
        let end = floor_hour(now);
        let start = end - ChronoDuration::hours(LIVE_HISTORY_ROWS as i64);
        let rows = self
            .fetch(lat, lon, start.date_naive(), end.date_naive(), RECENT_TIMEOUT)
            .await?;
        Ok(tail_until(rows, end, LIVE_HISTORY_ROWS))
    }
}

fn floor_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_minute(0))
        .unwrap_or(t)
}

/// Keep the last `count` rows at or before `end`. The archive answers in whole
/// days, so later hours of the current day are dropped.
fn tail_until(rows: Vec<FeatureRow>, end: DateTime<Utc>, count: usize) -> Vec<FeatureRow> {
    // ---
    let mut rows: Vec<FeatureRow> = rows.into_iter().filter(|r| r.time <= end).collect();
    let skip = rows.len().saturating_sub(count);
    rows.drain(..skip);
    rows
}

fn hourly_to_rows(hourly: ArchiveHourly) -> Vec<FeatureRow> {
    // ---
    let times: Vec<Option<DateTime<Utc>>> = hourly.time.iter().map(|t| parse_time(t)).collect();
    let n = times.len();

    let mut columns = [
        hourly.surface_pressure,
        hourly.rain,
        hourly.temperature_2m,
        hourly.relative_humidity_2m,
        hourly.dew_point_2m,
        hourly.cloud_cover,
        hourly.wind_direction_10m,
        hourly.wind_speed_10m,
    ];
    for column in columns.iter_mut() {
        column.resize(n, None);
        fill_gaps(column);
    }
    let cell = |c: usize, i: usize| columns[c][i].unwrap_or(0.0);

    let mut rows = Vec::with_capacity(n);
    for (i, time) in times.into_iter().enumerate() {
        let Some(time) = time else {
            tracing::debug!("Skipping archive row with unparseable time: {}", hourly.time[i]);
            continue;
        };
        rows.push(FeatureRow {
            time,
            surface_pressure: cell(0, i),
            rain: cell(1, i),
            temperature: cell(2, i),
            relative_humidity: cell(3, i),
            dew_point: cell(4, i),
            cloud_cover: cell(5, i),
            wind_direction: cell(6, i),
            wind_speed: cell(7, i),
        });
    }
    rows
}

/// Archive timestamps are GMT without an offset, e.g. `2025-07-01T13:00`.
fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|t| t.and_utc())
}

/// Interpolate, then forward-fill, then backward-fill one column in place.
pub fn fill_gaps(column: &mut [Option<f64>]) {
    // ---
    for v in column.iter_mut() {
        if v.is_some_and(|x| !x.is_finite()) {
            *v = None;
        }
    }

    let known: Vec<usize> = (0..column.len()).filter(|&i| column[i].is_some()).collect();
    if known.is_empty() {
        return;
    }

    // Linear interpolation between each pair of neighbouring samples
    for pair in known.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi - lo < 2 {
            continue;
        }
        let (a, b) = (column[lo].unwrap_or(0.0), column[hi].unwrap_or(0.0));
        let span = (hi - lo) as f64;
        for i in lo + 1..hi {
            let t = (i - lo) as f64 / span;
            column[i] = Some(a + (b - a) * t);
        }
    }

    // Forward fill the tail, backward fill the head
    let (first, last) = (known[0], known[known.len() - 1]);
    let (head, tail) = (column[first], column[last]);
    for v in &mut column[last + 1..] {
        *v = tail;
    }
    for v in &mut column[..first] {
        *v = head;
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fill_interpolates_interior_gaps() {
        // ---
        let mut col = vec![Some(1.0), None, None, Some(4.0)];
        fill_gaps(&mut col);
        assert_eq!(col, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_fill_forward_then_backward() {
        // ---
        let mut col = vec![None, None, Some(5.0), None, Some(7.0), None];
        fill_gaps(&mut col);
        assert_eq!(
            col,
            vec![Some(5.0), Some(5.0), Some(5.0), Some(6.0), Some(7.0), Some(7.0)]
        );
    }

    #[test]
    fn test_fill_leaves_empty_column_alone() {
        // ---
        let mut col: Vec<Option<f64>> = vec![None, None];
        fill_gaps(&mut col);
        assert_eq!(col, vec![None, None]);
    }

    #[test]
    fn test_fill_treats_nan_as_gap() {
        // ---
        let mut col = vec![Some(2.0), Some(f64::NAN), Some(4.0)];
        fill_gaps(&mut col);
        assert_eq!(col, vec![Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_archive_payload_to_rows() {
        // ---
        let body = r#"{
            "latitude": 30.72, "longitude": 78.44,
            "hourly": {
                "time": ["2025-07-01T00:00", "2025-07-01T01:00", "2025-07-01T02:00"],
                "surface_pressure": [880.0, null, 882.0],
                "rain": [null, null, null],
                "temperature_2m": [20.0, 21.0, 22.0],
                "relative_humidity_2m": [90, 91, 92],
                "dew_point_2m": [18.0, 18.5, null],
                "cloud_cover": [100, 100, 100],
                "wind_direction_10m": [180, 190, 200],
                "wind_speed_10m": [3.0, 3.5, 4.0]
            }
        }"#;
        let response: ArchiveResponse = serde_json::from_str(body).unwrap();
        let rows = hourly_to_rows(response.hourly.unwrap());

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].surface_pressure, 881.0);
        assert_eq!(rows[2].dew_point, 18.5);
        assert!(rows.iter().all(|r| r.rain == 0.0));
        assert_eq!(rows[2].time, Utc.with_ymd_and_hms(2025, 7, 1, 2, 0, 0).unwrap());
    }

    #[test]
    fn test_short_columns_are_padded() {
        // ---
        let hourly = ArchiveHourly {
            time: vec!["2025-07-01T00:00".into(), "2025-07-01T01:00".into()],
            temperature_2m: vec![Some(15.0)],
            ..Default::default()
        };
        let rows = hourly_to_rows(hourly);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].temperature, 15.0);
    }

    #[test]
    fn test_missing_hourly_block() {
        // ---
        let response: ArchiveResponse =
            serde_json::from_str(r#"{"error": true, "reason": "bad range"}"#).unwrap();
        assert!(response.hourly.is_none());
    }

    #[test]
    fn test_tail_until_drops_future_hours() {
        // ---
        let base = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let rows: Vec<FeatureRow> = (0..72)
            .map(|h| FeatureRow {
                time: base + ChronoDuration::hours(h),
                surface_pressure: h as f64,
                rain: 0.0,
                temperature: 0.0,
                relative_humidity: 0.0,
                dew_point: 0.0,
                cloud_cover: 0.0,
                wind_direction: 0.0,
                wind_speed: 0.0,
            })
            .collect();
        let end = base + ChronoDuration::hours(60);

        let kept = tail_until(rows, end, LIVE_HISTORY_ROWS);
        assert_eq!(kept.len(), LIVE_HISTORY_ROWS);
        assert_eq!(kept.last().unwrap().time, end);
        assert_eq!(kept[0].surface_pressure, 14.0);
    }

    #[test]
    fn test_floor_hour() {
        // ---
        let t = Utc.with_ymd_and_hms(2025, 7, 1, 13, 47, 12).unwrap();
        assert_eq!(floor_hour(t), Utc.with_ymd_and_hms(2025, 7, 1, 13, 0, 0).unwrap());
    }
}
