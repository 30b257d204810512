//! Database schema management for the calibration log.
//!
//! Ensures the prediction log table and its index exist before serving
//! requests. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the calibration schema (idempotent).
///
/// Creates `prediction_log`, keyed by node and timestamp. Safe to call on
/// every startup; no-op if the objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prediction_log (
            id                UUID             NOT NULL UNIQUE,
            node_id           TEXT             NOT NULL,
            recorded_at       TIMESTAMPTZ      NOT NULL,
            mode              TEXT             NOT NULL,
            temperature       DOUBLE PRECISION NOT NULL,
            humidity          DOUBLE PRECISION NOT NULL,
            pressure          DOUBLE PRECISION NOT NULL,
            dew_point         DOUBLE PRECISION,
            base_probability  DOUBLE PRECISION NOT NULL,
            final_probability DOUBLE PRECISION NOT NULL,
            cloud_base_m      DOUBLE PRECISION,
            cloud_ceiling_m   DOUBLE PRECISION,
            visibility_m      DOUBLE PRECISION,
            wind_gust         DOUBLE PRECISION,
            altitude_m        DOUBLE PRECISION,
            PRIMARY KEY (node_id, recorded_at)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Calibration queries scan by time across nodes
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_prediction_log_recorded_at
            ON prediction_log (recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
