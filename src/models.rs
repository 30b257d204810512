//! Data models shared by the prediction pipelines.
//!
//! Everything here is plain data: configured nodes, the per-hour feature rows
//! fed to the classifier, the live sensor/conditions samples a request
//! reconciles, and the JSON bodies the two endpoints return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Number of hourly rows the classifier consumes per prediction.
pub const WINDOW_LEN: usize = 48;

/// Number of features per row.
pub const FEATURE_COUNT: usize = 8;

/// Canonical feature order, as named by the weather archive.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "surface_pressure",
    "rain",
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "cloud_cover",
    "wind_direction_10m",
    "wind_speed_10m",
];

/// A statically configured monitoring site.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Node {
    // ---
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,

    /// Time-series bucket holding this node's readings.
    pub bucket: String,

    /// Measurement name inside the bucket.
    pub measurement: String,

    /// Whether the node's sensor measures humidity natively. Nodes without
    /// it take humidity from the realtime conditions service.
    #[serde(default = "default_true")]
    pub has_humidity: bool,
}

fn default_true() -> bool {
    true
}

/// One hourly record of the eight model features.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct FeatureRow {
    // ---
    pub time: DateTime<Utc>,
    pub surface_pressure: f64,
    pub rain: f64,
    pub temperature: f64,
    pub relative_humidity: f64,
    pub dew_point: f64,
    pub cloud_cover: f64,
    pub wind_direction: f64,
    pub wind_speed: f64,
}

impl FeatureRow {
    /// Features in canonical order. Non-finite cells come back as zero.
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        // ---
        [
            self.surface_pressure,
            self.rain,
            self.temperature,
            self.relative_humidity,
            self.dew_point,
            self.cloud_cover,
            self.wind_direction,
            self.wind_speed,
        ]
        .map(|v| if v.is_finite() { v } else { 0.0 })
    }
}

/// Exactly [`WINDOW_LEN`] feature rows, most recent last.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct FeatureWindow {
    rows: Vec<FeatureRow>,
}

impl FeatureWindow {
    // ---
    pub fn new(rows: Vec<FeatureRow>) -> anyhow::Result<Self> {
        // ---
        anyhow::ensure!(
            rows.len() == WINDOW_LEN,
            "feature window needs {} rows, got {}",
            WINDOW_LEN,
            rows.len()
        );
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn latest(&self) -> &FeatureRow {
        // The constructor guarantees a non-empty window.
        &self.rows[WINDOW_LEN - 1]
    }
}

/// Latest reading from a node's sensor. Humidity is `None` when the sensor
/// does not measure it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    // ---
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: Option<f64>,
}

/// Current atmospheric conditions from the realtime service. Distances are
/// in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditions {
    // ---
    pub cloud_cover: f64,
    pub rain: f64,
    pub wind_speed: f64,
    pub wind_dir: f64,
    pub cloud_base_m: Option<f64>,
    pub cloud_ceiling_m: Option<f64>,
    pub visibility_m: Option<f64>,
    pub wind_gust: Option<f64>,
    pub humidity: Option<f64>,
}

/// Conditions used when the realtime service is unavailable: calm, dry and
/// clear, with gusts reported as zero and the other auxiliary signals unknown.
impl Default for Conditions {
    fn default() -> Self {
        Conditions {
            cloud_cover: 0.0,
            rain: 0.0,
            wind_speed: 0.0,
            wind_dir: 0.0,
            cloud_base_m: None,
            cloud_ceiling_m: None,
            visibility_m: None,
            wind_gust: Some(0.0),
            humidity: None,
        }
    }
}

/// A sensor sample after humidity reconciliation, with derived dew point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveObservation {
    // ---
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub dew_point: Option<f64>,
}

impl LiveObservation {
    /// Fold the observation and the current conditions into one feature row.
    /// An unknown dew point enters the row as zero.
    pub fn to_feature_row(&self, conditions: &Conditions, time: DateTime<Utc>) -> FeatureRow {
        // ---
        FeatureRow {
            time,
            surface_pressure: self.pressure,
            rain: conditions.rain,
            temperature: self.temperature,
            relative_humidity: self.humidity,
            dew_point: self.dew_point.unwrap_or(0.0),
            cloud_cover: conditions.cloud_cover,
            wind_direction: conditions.wind_dir,
            wind_speed: conditions.wind_speed,
        }
    }
}

/// Response body of `GET /node/{node_id}/latest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestPrediction {
    // ---
    pub node: String,
    pub name: String,
    pub temp: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub dew: Option<f64>,
    pub cloud_cover: f64,
    pub rain: f64,
    pub wind_speed: f64,
    pub wind_dir: f64,
    pub cloud_base_m: Option<f64>,
    pub cloud_ceiling_m: Option<f64>,
    pub visibility_m: Option<f64>,
    pub wind_gust: Option<f64>,
    pub base_probability: f64,
    pub final_probability: f64,
    pub risk: u8,
    pub altitude_m: Option<f64>,
    pub time: String,
}

/// Response body of `GET /history`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPrediction {
    // ---
    pub node: String,
    pub node_name: String,

    /// Final probability as a percentage, two decimals.
    pub probability: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub altitude_m: Option<f64>,
    pub rain: f64,
    pub cloud: f64,
    pub wind_speed: f64,
    pub wind_dir: f64,

    /// Base64 image, or empty when no chart was rendered.
    pub chart: String,
}
