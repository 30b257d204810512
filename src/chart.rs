//! History chart rendering, delegated to an external renderer service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde_json::json;

use crate::models::FeatureWindow;

// ---

const TIMEOUT: Duration = Duration::from_secs(10);

/// Renders a feature window and its probability into an image.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, window: &FeatureWindow, probability: f64) -> Result<Vec<u8>>;
}

/// POSTs `{probability, rows}` and takes the response body as the image.
pub struct RemoteChartRenderer {
    client: Client,
    url: String,
}

impl RemoteChartRenderer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ChartRenderer for RemoteChartRenderer {
    async fn render(&self, window: &FeatureWindow, probability: f64) -> Result<Vec<u8>> {
        // ---
        let bytes = self
            .client
            .post(&self.url)
            .json(&json!({ "probability": probability, "rows": window }))
            .timeout(TIMEOUT)
            .send()
            .await
            .context("chart renderer unreachable")?
            .error_for_status()
            .context("chart renderer failed")?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// Render and base64-encode, or return an empty string if there is no
/// renderer or it fails.
pub async fn encoded_chart(
    renderer: Option<&dyn ChartRenderer>,
    window: &FeatureWindow,
    probability: f64,
) -> String {
    // ---
    let Some(renderer) = renderer else {
        return String::new();
    };
    match renderer.render(window, probability).await {
        Ok(image) if !image.is_empty() => STANDARD.encode(image),
        Ok(_) => String::new(),
        Err(e) => {
            tracing::warn!("Chart rendering failed: {:#}", e);
            String::new()
        }
    }
}
