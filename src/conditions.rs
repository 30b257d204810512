//! Realtime atmospheric conditions (Tomorrow.io `weather/realtime`).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::Conditions;

// ---

const TIMEOUT: Duration = Duration::from_secs(6);

const FIELDS: [&str; 9] = [
    "cloudCover",
    "precipitationIntensity",
    "windSpeed",
    "windDirection",
    "cloudBase",
    "cloudCeiling",
    "visibility",
    "windGust",
    "humidity",
];

/// Source of current conditions for a coordinate.
#[async_trait]
pub trait ConditionsSource: Send + Sync {
    async fn current(&self, lat: f64, lon: f64) -> Result<Conditions>;
}

#[derive(Clone)]
pub struct RealtimeClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RealtimeResponse {
    #[serde(default)]
    data: RealtimeData,
}

#[derive(Debug, Default, Deserialize)]
struct RealtimeData {
    #[serde(default)]
    values: RealtimeValues,
}

/// Cloud base, ceiling and visibility are reported in kilometres.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RealtimeValues {
    cloud_cover: Option<f64>,
    precipitation_intensity: Option<f64>,
    wind_speed: Option<f64>,
    wind_direction: Option<f64>,
    cloud_base: Option<f64>,
    cloud_ceiling: Option<f64>,
    visibility: Option<f64>,
    wind_gust: Option<f64>,
    humidity: Option<f64>,
}

impl From<RealtimeValues> for Conditions {
    fn from(v: RealtimeValues) -> Self {
        // ---
        let km_to_m = |km: Option<f64>| km.map(|k| k * 1000.0);
        Conditions {
            cloud_cover: v.cloud_cover.unwrap_or(0.0),
            rain: v.precipitation_intensity.unwrap_or(0.0),
            wind_speed: v.wind_speed.unwrap_or(0.0),
            wind_dir: v.wind_direction.unwrap_or(0.0),
            cloud_base_m: km_to_m(v.cloud_base),
            cloud_ceiling_m: km_to_m(v.cloud_ceiling),
            visibility_m: km_to_m(v.visibility),
            wind_gust: Some(v.wind_gust.unwrap_or(0.0)),
            humidity: v.humidity,
        }
    }
}

impl RealtimeClient {
    // ---
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ConditionsSource for RealtimeClient {
    async fn current(&self, lat: f64, lon: f64) -> Result<Conditions> {
        // ---
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("TOMORROW_API_KEY is not configured"))?;

        let response: RealtimeResponse = self
            .client
            .get(&self.base_url)
            .query(&[
                ("location", format!("{lat},{lon}")),
                ("fields", FIELDS.join(",")),
                ("apikey", api_key.to_string()),
            ])
            .timeout(TIMEOUT)
            .send()
            .await
            .context("realtime conditions request failed")?
            .error_for_status()
            .context("realtime conditions service returned an error")?
            .json()
            .await
            .context("realtime conditions payload did not decode")?;

        Ok(response.data.values.into())
    }
}
