//! Calibration log: one row per prediction for offline analysis.
//!
//! Writes are best-effort. Callers spawn them off the response path and a
//! failure is only logged.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::pipeline::PipelineMode;

// ---

/// Snapshot of one prediction's inputs and outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    // ---
    pub id: Uuid,
    pub node_id: String,
    pub recorded_at: DateTime<Utc>,
    pub mode: PipelineMode,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub dew_point: Option<f64>,
    pub base_probability: f64,
    pub final_probability: f64,
    pub cloud_base_m: Option<f64>,
    pub cloud_ceiling_m: Option<f64>,
    pub visibility_m: Option<f64>,
    pub wind_gust: Option<f64>,
    pub altitude_m: Option<f64>,
}

/// Append-only store for calibration records.
#[async_trait]
pub trait CalibrationSink: Send + Sync {
    async fn record(&self, record: &CalibrationRecord) -> Result<()>;
}

/// Postgres-backed calibration log (`prediction_log`, see `schema.rs`).
#[derive(Clone)]
pub struct PgCalibrationLog {
    pool: PgPool,
}

impl PgCalibrationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CalibrationSink for PgCalibrationLog {
    async fn record(&self, record: &CalibrationRecord) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO prediction_log (
                id, node_id, recorded_at, mode,
                temperature, humidity, pressure, dew_point,
                base_probability, final_probability,
                cloud_base_m, cloud_ceiling_m, visibility_m, wind_gust,
                altitude_m
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (node_id, recorded_at) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.node_id)
        .bind(record.recorded_at)
        .bind(record.mode.as_str())
        .bind(record.temperature)
        .bind(record.humidity)
        .bind(record.pressure)
        .bind(record.dew_point)
        .bind(record.base_probability)
        .bind(record.final_probability)
        .bind(record.cloud_base_m)
        .bind(record.cloud_ceiling_m)
        .bind(record.visibility_m)
        .bind(record.wind_gust)
        .bind(record.altitude_m)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
