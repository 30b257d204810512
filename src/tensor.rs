//! Model-input assembly.
//!
//! History rows and (in live mode) the live row are merged into one window of
//! exactly [`WINDOW_LEN`] rows, projected onto the canonical feature order,
//! scaled column-wise and laid out as a `(1, W, 1, 1, F)` tensor.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::{FeatureRow, FeatureWindow, FEATURE_COUNT, WINDOW_LEN};

// ---

pub const INSUFFICIENT_DATA: &str = "Insufficient data (<48 rows).";

/// Pre-fitted column-wise linear transform.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// `(x - mean) / scale`
    Standard {
        mean: [f64; FEATURE_COUNT],
        scale: [f64; FEATURE_COUNT],
    },
    /// `x * scale + min`
    MinMax {
        min: [f64; FEATURE_COUNT],
        scale: [f64; FEATURE_COUNT],
    },
}

impl Scaler {
    /// Load a scaler exported as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        // ---
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read scaler file {}", path.display()))?;
        let scaler: Scaler = serde_json::from_str(&raw)
            .with_context(|| format!("invalid scaler file {}", path.display()))?;
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> Result<()> {
        // ---
        let (offsets, scale) = match self {
            Scaler::Standard { mean, scale } => {
                ensure!(
                    scale.iter().all(|s| *s != 0.0),
                    "standard scaler has a zero scale"
                );
                (mean, scale)
            }
            Scaler::MinMax { min, scale } => (min, scale),
        };
        ensure!(
            offsets.iter().chain(scale.iter()).all(|v| v.is_finite()),
            "scaler parameters must be finite"
        );
        Ok(())
    }

    pub fn transform(&self, row: [f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        // ---
        let mut out = [0.0; FEATURE_COUNT];
        for (i, x) in row.into_iter().enumerate() {
            out[i] = match self {
                Scaler::Standard { mean, scale } => (x - mean[i]) / scale[i],
                Scaler::MinMax { min, scale } => x * scale[i] + min[i],
            };
        }
        out
    }
}

/// Fixed-shape classifier input.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    values: Vec<f32>,
}

impl ModelInput {
    pub const SHAPE: [usize; 5] = [1, WINDOW_LEN, 1, 1, FEATURE_COUNT];

    fn zeros() -> Self {
        Self {
            values: vec![0.0; Self::SHAPE.iter().product()],
        }
    }

    /// Flat values in row-major order.
    #[cfg(test)]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// One feature vector per window row, oldest first.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.values.chunks(FEATURE_COUNT)
    }
}

/// How a pipeline builds its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// History plus a live row; short windows are padded.
    LiveMerge,
    /// History only; a short window is an error.
    HistoryOnly,
}

/// Result of assembling one request's input.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub input: ModelInput,
    pub window: FeatureWindow,

    /// `false` when no scaler was loaded and `input` is all zeros.
    pub scaled: bool,
}

pub struct TensorAssembler {
    scaler: Option<Scaler>,
}

impl TensorAssembler {
    // ---
    pub fn new(scaler: Option<Scaler>) -> Self {
        Self { scaler }
    }

    pub fn has_scaler(&self) -> bool {
        self.scaler.is_some()
    }

    /// Build the window and model input for one prediction.
    pub fn assemble(
        &self,
        policy: WindowPolicy,
        history: Vec<FeatureRow>,
        live: Option<FeatureRow>,
    ) -> Result<Assembled, PipelineError> {
        // ---
        let mut rows = history;
        rows.extend(live);

        if rows.is_empty() || (policy == WindowPolicy::HistoryOnly && rows.len() < WINDOW_LEN) {
            return Err(PipelineError::DataUnavailable(INSUFFICIENT_DATA.to_string()));
        }

        let rows = fit_window(rows);
        let window = FeatureWindow::new(rows)?;

        let Some(scaler) = &self.scaler else {
            tracing::warn!("No feature scaler loaded; using a zero-filled model input");
            return Ok(Assembled {
                input: ModelInput::zeros(),
                window,
                scaled: false,
            });
        };

        let values = window
            .rows()
            .iter()
            .flat_map(|row| scaler.transform(row.features()))
            .map(|v| if v.is_finite() { v as f32 } else { 0.0 })
            .collect();

        Ok(Assembled {
            input: ModelInput { values },
            window,
            scaled: true,
        })
    }
}

/// Keep the most recent [`WINDOW_LEN`] rows; pad a short, non-empty window at
/// the front with copies of its oldest row.
fn fit_window(mut rows: Vec<FeatureRow>) -> Vec<FeatureRow> {
    // ---
    if rows.len() > WINDOW_LEN {
        rows.drain(..rows.len() - WINDOW_LEN);
    } else if let Some(oldest) = rows.first().copied() {
        let missing = WINDOW_LEN - rows.len();
        if missing > 0 {
            tracing::debug!("Padding feature window with {} copies of its oldest row", missing);
            rows.splice(0..0, std::iter::repeat(oldest).take(missing));
        }
    }
    rows
}
