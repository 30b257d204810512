//! Prediction pipelines.
//!
//! One implementation serves both endpoints, parameterized by [`PipelineMode`]:
//!
//! - **Live merge** (`/node/{id}/latest`): latest sensor reading + realtime
//!   conditions + recent archive history, adjusted with auxiliary signals.
//! - **History only** (`/history`): a full window from the archive for a
//!   user-chosen coordinate and date range.
//!
//! Relay, alert and calibration side effects are spawned as independent tasks
//! once the probability is known; the response never waits on them.

use std::sync::Arc;

use chrono::{NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

use crate::alerts::DecisionController;
use crate::atmosphere::altitude;
use crate::calibration::{CalibrationRecord, CalibrationSink};
use crate::chart::{encoded_chart, ChartRenderer};
use crate::conditions::ConditionsSource;
use crate::error::PipelineError;
use crate::history::HistorySource;
use crate::inference::InferenceEngine;
use crate::models::{Conditions, HistoryPrediction, LatestPrediction, Node};
use crate::notify::alert_text;
use crate::reconcile::reconcile;
use crate::risk::{adjust_risk, AuxSignals};
use crate::sensors::SensorStore;
use crate::tensor::{TensorAssembler, WindowPolicy};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    LiveMerge,
    HistoryOnly,
}

impl PipelineMode {
    /// Probability reported when no model is available.
    pub fn fallback_probability(self) -> f64 {
        match self {
            PipelineMode::LiveMerge => 0.1,
            PipelineMode::HistoryOnly => 0.4,
        }
    }

    /// Clear-command publishes below the risk threshold.
    pub fn clear_publishes(self) -> u32 {
        match self {
            PipelineMode::LiveMerge => 0,
            PipelineMode::HistoryOnly => 1,
        }
    }

    pub fn window_policy(self) -> WindowPolicy {
        match self {
            PipelineMode::LiveMerge => WindowPolicy::LiveMerge,
            PipelineMode::HistoryOnly => WindowPolicy::HistoryOnly,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineMode::LiveMerge => "live",
            PipelineMode::HistoryOnly => "history",
        }
    }
}

/// Validated `/history` request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryRequest {
    pub lat: f64,
    pub lon: f64,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Everything a request needs. Read-only after startup; shared behind `Arc`.
pub struct Predictor {
    pub nodes: Vec<Node>,
    pub sensors: Arc<dyn SensorStore>,
    pub conditions: Arc<dyn ConditionsSource>,
    pub history: Arc<dyn HistorySource>,
    pub assembler: TensorAssembler,
    pub engine: InferenceEngine,
    pub controller: Arc<DecisionController>,
    pub calibration: Option<Arc<dyn CalibrationSink>>,
    pub chart: Option<Arc<dyn ChartRenderer>>,
}

impl Predictor {
    // ---
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// Configured node closest to a coordinate (Manhattan distance in degrees).
    /// An exact tie goes to the later node.
    pub fn nearest_node(&self, lat: f64, lon: f64) -> Option<&Node> {
        // ---
        let distance = |n: &Node| (lat - n.lat).abs() + (lon - n.lon).abs();
        self.nodes.iter().reduce(|best, n| {
            if distance(n) <= distance(best) {
                n
            } else {
                best
            }
        })
    }

    /// Live-merge prediction for one node.
    pub async fn predict_latest(&self, node_id: &str) -> Result<LatestPrediction, PipelineError> {
        // ---
        let mode = PipelineMode::LiveMerge;
        let node = self.node(node_id).ok_or(PipelineError::InvalidNode)?;
        tracing::info!("Live prediction for node {} ({})", node.id, node.name);

        // Step 1: mandatory sensor reading
        let sample = match self.sensors.latest(node).await {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                tracing::warn!("Node {} reported no data in the lookback window", node.id);
                return Err(PipelineError::SensorUnavailable);
            }
            Err(e) => {
                tracing::warn!("Sensor read for node {} failed: {:#}", node.id, e);
                return Err(PipelineError::SensorUnavailable);
            }
        };

        // Step 2: optional realtime conditions
        let conditions = self
            .conditions
            .current(node.lat, node.lon)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Realtime conditions unavailable, using defaults: {:#}", e);
                Conditions::default()
            });

        // Step 3: reconcile humidity and derive dew point
        let observation = reconcile(&sample, &conditions);

        // Step 4: optional history; the live row alone still makes a window
        let now = Utc::now();
        let history = self
            .history
            .fetch_recent(node.lat, node.lon, now)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Weather history unavailable, using live row only: {}", e);
                Vec::new()
            });

        let live_row = observation.to_feature_row(&conditions, now);
        let assembled = self
            .assembler
            .assemble(mode.window_policy(), history, Some(live_row))?;

        // Step 5: inference and adjustment
        let inference = self
            .engine
            .predict(&assembled.input, mode.fallback_probability())
            .await;
        let base = inference.probability;
        let aux = AuxSignals::from(&conditions);
        let final_probability = adjust_risk(base, &aux);
        let risk = self.controller.is_risk(final_probability);
        let altitude_m = altitude(observation.pressure);

        tracing::info!(
            "Node {}: base={:.3} final={:.3} risk={} fallback={} scaled={}",
            node.id,
            base,
            final_probability,
            risk,
            inference.fallback,
            assembled.scaled
        );

        // Step 6: side effects, off the response path
        let text = alert_text(
            &node.name,
            final_probability,
            observation.temperature,
            observation.humidity,
            conditions.rain,
            conditions.cloud_cover,
            altitude_m,
        );
        self.spawn_decision(mode, &node.id, final_probability, text);
        self.spawn_calibration(CalibrationRecord {
            id: Uuid::new_v4(),
            node_id: node.id.clone(),
            recorded_at: now,
            mode,
            temperature: observation.temperature,
            humidity: observation.humidity,
            pressure: observation.pressure,
            dew_point: observation.dew_point,
            base_probability: base,
            final_probability,
            cloud_base_m: aux.cloud_base_m,
            cloud_ceiling_m: aux.cloud_ceiling_m,
            visibility_m: aux.visibility_m,
            wind_gust: aux.wind_gust,
            altitude_m,
        });

        Ok(LatestPrediction {
            node: node.id.clone(),
            name: node.name.clone(),
            temp: observation.temperature,
            humidity: observation.humidity,
            pressure: observation.pressure,
            dew: observation.dew_point,
            cloud_cover: conditions.cloud_cover,
            rain: conditions.rain,
            wind_speed: conditions.wind_speed,
            wind_dir: conditions.wind_dir,
            cloud_base_m: conditions.cloud_base_m,
            cloud_ceiling_m: conditions.cloud_ceiling_m,
            visibility_m: conditions.visibility_m,
            wind_gust: conditions.wind_gust,
            base_probability: base,
            final_probability,
            risk: u8::from(risk),
            altitude_m,
            time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }

    /// History-only prediction for a coordinate and date range.
    pub async fn predict_history(
        &self,
        request: HistoryRequest,
    ) -> Result<HistoryPrediction, PipelineError> {
        // ---
        let mode = PipelineMode::HistoryOnly;
        let node = self
            .nearest_node(request.lat, request.lon)
            .ok_or(PipelineError::InvalidNode)?;
        tracing::info!(
            "History prediction at ({}, {}) {}..{}, nearest node {}",
            request.lat,
            request.lon,
            request.start,
            request.end,
            node.id
        );

        let rows = self
            .history
            .fetch_range(request.lat, request.lon, request.start, request.end)
            .await?;
        let assembled = self.assembler.assemble(mode.window_policy(), rows, None)?;

        let inference = self
            .engine
            .predict(&assembled.input, mode.fallback_probability())
            .await;
        let base = inference.probability;
        // The archive carries no auxiliary signals
        let final_probability = adjust_risk(base, &AuxSignals::default());

        let last = *assembled.window.latest();
        let altitude_m = altitude(last.surface_pressure);

        tracing::info!(
            "Node {}: history probability={:.3} fallback={} scaled={}",
            node.id,
            final_probability,
            inference.fallback,
            assembled.scaled
        );

        let text = alert_text(
            &node.name,
            final_probability,
            last.temperature,
            last.relative_humidity,
            last.rain,
            last.cloud_cover,
            altitude_m,
        );
        self.spawn_decision(mode, &node.id, final_probability, text);
        self.spawn_calibration(CalibrationRecord {
            id: Uuid::new_v4(),
            node_id: node.id.clone(),
            recorded_at: Utc::now(),
            mode,
            temperature: last.temperature,
            humidity: last.relative_humidity,
            pressure: last.surface_pressure,
            dew_point: Some(last.dew_point),
            base_probability: base,
            final_probability,
            cloud_base_m: None,
            cloud_ceiling_m: None,
            visibility_m: None,
            wind_gust: None,
            altitude_m,
        });

        let chart = encoded_chart(self.chart.as_deref(), &assembled.window, final_probability).await;

        Ok(HistoryPrediction {
            node: node.id.clone(),
            node_name: node.name.clone(),
            probability: (final_probability * 10_000.0).round() / 100.0,
            temperature: last.temperature,
            humidity: last.relative_humidity,
            pressure: last.surface_pressure,
            altitude_m,
            rain: last.rain,
            cloud: last.cloud_cover,
            wind_speed: last.wind_speed,
            wind_dir: last.wind_direction,
            chart,
        })
    }

    fn spawn_decision(&self, mode: PipelineMode, node_id: &str, probability: f64, text: String) {
        // ---
        let controller = self.controller.clone();
        let node_id = node_id.to_string();
        tokio::spawn(async move {
            let transition = controller.dispatch(mode, &node_id, probability, &text).await;
            tracing::debug!("Node {} alert transition: {:?}", node_id, transition);
        });
    }

    fn spawn_calibration(&self, record: CalibrationRecord) {
        // ---
        let Some(sink) = self.calibration.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = sink.record(&record).await {
                tracing::warn!("Calibration write for node {} failed: {:#}", record.node_id, e);
            }
        });
    }
}
