//! Latest node readings from the time-series store (InfluxDB v2 query API).
//!
//! Nodes report through different firmware, so field names vary. Each
//! quantity is looked up through a list of candidate names.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::models::{Node, SensorSample};

// ---

const TIMEOUT: Duration = Duration::from_secs(8);

const TEMPERATURE_FIELDS: [&str; 5] = ["temperature", "temp", "tempC", "temperature_C", "t"];
const HUMIDITY_FIELDS: [&str; 5] = ["humidity", "hum", "relative_humidity", "rh", "humidity_pct"];
const PRESSURE_FIELDS: [&str; 4] = ["pressure", "pres", "baro", "pressure_hpa"];

/// Store holding the raw node telemetry.
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Most recent reading within the lookback window, `None` if the node
    /// reported nothing.
    async fn latest(&self, node: &Node) -> Result<Option<SensorSample>>;
}

#[derive(Clone)]
pub struct InfluxClient {
    client: Client,
    url: String,
    token: String,
    org: String,
}

impl InfluxClient {
    // ---
    pub fn new(client: Client, url: &str, token: String, org: String) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            token,
            org,
        }
    }
}

/// Last value of every field in the node's measurement over the past 20 minutes.
fn latest_row_query(node: &Node) -> String {
    format!(
        r#"from(bucket: "{}")
  |> range(start: -20m)
  |> filter(fn: (r) => r._measurement == "{}")
  |> last()"#,
        node.bucket, node.measurement
    )
}

#[async_trait]
impl SensorStore for InfluxClient {
    async fn latest(&self, node: &Node) -> Result<Option<SensorSample>> {
        // ---
        let body = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(latest_row_query(node))
            .timeout(TIMEOUT)
            .send()
            .await
            .context("time-series query failed")?
            .error_for_status()
            .context("time-series store rejected the query")?
            .text()
            .await?;

        let fields = parse_field_values(&body)?;
        tracing::debug!("Node {} latest fields: {:?}", node.id, fields);
        Ok(sample_from_fields(&fields, node.has_humidity))
    }
}

/// Collect `_field -> _value` from a Flux CSV response. The response holds one
/// table per field, each repeating its header row.
fn parse_field_values(body: &str) -> Result<HashMap<String, String>> {
    // ---
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut fields = HashMap::new();
    let mut columns: Option<(usize, usize)> = None;
    for record in reader.records() {
        let record = record.context("malformed time-series CSV")?;
        let field_col = record.iter().position(|c| c == "_field");
        let value_col = record.iter().position(|c| c == "_value");
        if let (Some(f), Some(v)) = (field_col, value_col) {
            columns = Some((f, v));
            continue;
        }
        let Some((f, v)) = columns else { continue };
        if let (Some(name), Some(value)) = (record.get(f), record.get(v)) {
            if !name.is_empty() {
                fields.insert(name.to_string(), value.to_string());
            }
        }
    }
    Ok(fields)
}

fn pick(fields: &HashMap<String, String>, candidates: &[&str]) -> Option<f64> {
    candidates
        .iter()
        .filter_map(|name| fields.get(*name))
        .find_map(|raw| raw.trim().parse::<f64>().ok())
}

fn sample_from_fields(fields: &HashMap<String, String>, has_humidity: bool) -> Option<SensorSample> {
    // ---
    if fields.is_empty() {
        return None;
    }
    let humidity = if has_humidity {
        pick(fields, &HUMIDITY_FIELDS)
    } else {
        None
    };
    Some(SensorSample {
        temperature: pick(fields, &TEMPERATURE_FIELDS).unwrap_or(0.0),
        pressure: pick(fields, &PRESSURE_FIELDS).unwrap_or(0.0),
        humidity,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const RESPONSE: &str = "\
,result,table,_start,_stop,_time,_value,_field,_measurement,dev
,_result,0,2025-07-01T11:40:00Z,2025-07-01T12:00:00Z,2025-07-01T11:58:10Z,61.5,hum,lorawan_data,node1
\r
,result,table,_start,_stop,_time,_value,_field,_measurement,dev
,_result,1,2025-07-01T11:40:00Z,2025-07-01T12:00:00Z,2025-07-01T11:58:10Z,947.2,pressure,lorawan_data,node1
\r
,result,table,_start,_stop,_time,_value,_field,_measurement,dev
,_result,2,2025-07-01T11:40:00Z,2025-07-01T12:00:00Z,2025-07-01T11:58:10Z,23.4,temp,lorawan_data,node1
";

    fn node(has_humidity: bool) -> Node {
        Node {
            id: "1".into(),
            name: "Node 1 - Pune".into(),
            lat: 18.495277,
            lon: 74.021388,
            bucket: "node1".into(),
            measurement: "lorawan_data".into(),
            has_humidity,
        }
    }

    #[test]
    fn test_parse_multi_table_response() {
        // ---
        let fields = parse_field_values(RESPONSE).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["hum"], "61.5");
        assert_eq!(fields["pressure"], "947.2");
        assert_eq!(fields["temp"], "23.4");
    }

    #[test]
    fn test_sample_uses_candidate_names() {
        // ---
        let fields = parse_field_values(RESPONSE).unwrap();
        let sample = sample_from_fields(&fields, true).unwrap();
        assert_eq!(
            sample,
            SensorSample {
                temperature: 23.4,
                pressure: 947.2,
                humidity: Some(61.5),
            }
        );
    }

    #[test]
    fn test_node_without_humidity_sensor_reports_unknown() {
        // ---
        let fields = parse_field_values(RESPONSE).unwrap();
        let sample = sample_from_fields(&fields, false).unwrap();
        assert_eq!(sample.humidity, None);
        assert_eq!(sample.temperature, 23.4);
    }

    #[test]
    fn test_empty_response_is_no_sample() {
        // ---
        let fields = parse_field_values("").unwrap();
        assert!(sample_from_fields(&fields, true).is_none());
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        // ---
        let mut fields = HashMap::new();
        fields.insert("battery".to_string(), "3.7".to_string());
        fields.insert("temperature".to_string(), "not-a-number".to_string());
        let sample = sample_from_fields(&fields, true).unwrap();
        assert_eq!(sample.temperature, 0.0);
        assert_eq!(sample.pressure, 0.0);
        assert_eq!(sample.humidity, None);
    }

    #[test]
    fn test_query_targets_node_bucket() {
        // ---
        let q = latest_row_query(&node(true));
        assert!(q.contains(r#"from(bucket: "node1")"#));
        assert!(q.contains(r#"r._measurement == "lorawan_data""#));
        assert!(q.contains("range(start: -20m)"));
    }
}
