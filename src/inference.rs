//! Classifier wrapper.
//!
//! The trained sequence classifier runs behind a TensorFlow-Serving style REST
//! endpoint. All predictions go through one async mutex that owns the model
//! handle, so at most one inference is in flight per process. When no model
//! is available the engine answers with the caller's fallback probability.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::tensor::ModelInput;

// ---

const PREDICT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pure function from a model input to a probability.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, input: &ModelInput) -> Result<f64>;
}

/// Outcome of one inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inference {
    pub probability: f64,

    /// `true` when `probability` is the fallback rather than a model output.
    pub fallback: bool,
}

pub struct InferenceEngine {
    model: Option<Mutex<Box<dyn Classifier>>>,
}

impl InferenceEngine {
    // ---
    pub fn new(model: Option<Box<dyn Classifier>>) -> Self {
        Self {
            model: model.map(Mutex::new),
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Run the classifier, or return `fallback` if there is none or it fails.
    pub async fn predict(&self, input: &ModelInput, fallback: f64) -> Inference {
        // ---
        let Some(model) = &self.model else {
            tracing::debug!("No model loaded; returning fallback probability {}", fallback);
            return Inference {
                probability: fallback,
                fallback: true,
            };
        };

        let guard = model.lock().await;
        match guard.predict(input).await {
            Ok(p) if p.is_finite() => Inference {
                probability: p.clamp(0.0, 1.0),
                fallback: false,
            },
            Ok(p) => {
                tracing::warn!("Model returned a non-finite probability ({}); using fallback", p);
                Inference {
                    probability: fallback,
                    fallback: true,
                }
            }
            Err(e) => {
                tracing::warn!("Inference failed, using fallback {}: {:#}", fallback, e);
                Inference {
                    probability: fallback,
                    fallback: true,
                }
            }
        }
    }
}

/// Client for a model served over REST (`GET {url}` for status,
/// `POST {url}:predict` for inference).
pub struct RemoteClassifier {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Vec<Vec<f64>>,
}

impl RemoteClassifier {
    /// Probe the model endpoint and return a client if it answers.
    pub async fn connect(client: Client, url: &str) -> Result<Self> {
        // ---
        let url = url.trim_end_matches('/').to_string();
        client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("model endpoint {url} unreachable"))?
            .error_for_status()
            .with_context(|| format!("model endpoint {url} is not serving"))?;
        Ok(Self { client, url })
    }
}

/// `{"instances": [W x 1 x 1 x F]}`; the batch dimension is the instances list.
fn request_body(input: &ModelInput) -> Value {
    // ---
    let instance: Vec<Value> = input.rows().map(|row| json!([[row]])).collect();
    json!({ "instances": [instance] })
}

fn first_probability(response: PredictResponse) -> Result<f64> {
    response
        .predictions
        .first()
        .and_then(|p| p.first())
        .copied()
        .ok_or_else(|| anyhow!("model response contained no prediction"))
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn predict(&self, input: &ModelInput) -> Result<f64> {
        // ---
        let response: PredictResponse = self
            .client
            .post(format!("{}:predict", self.url))
            .json(&request_body(input))
            .timeout(PREDICT_TIMEOUT)
            .send()
            .await
            .context("model request failed")?
            .error_for_status()
            .context("model server returned an error")?
            .json()
            .await
            .context("model response did not decode")?;
        first_probability(response)
    }
}
