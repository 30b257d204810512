//! Operator alerts by SMS (Fast2SMS bulkV2 quick route).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

// ---

const TIMEOUT: Duration = Duration::from_secs(12);

/// Sends a short text to a fixed recipient list.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SmsNotifier {
    client: Client,
    url: String,
    api_key: String,
    recipients: Vec<String>,
}

impl SmsNotifier {
    // ---
    pub fn new(client: Client, url: impl Into<String>, api_key: String, recipients: Vec<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
            recipients,
        }
    }

    /// Recipients in the gateway's comma-separated form.
    fn numbers(&self) -> String {
        self.recipients.join(",")
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        // ---
        if self.recipients.is_empty() {
            bail!("no SMS recipients configured");
        }

        let numbers = self.numbers();
        tracing::debug!("Sending SMS to {}: {}", numbers, text);

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("authorization", self.api_key.as_str()),
                ("route", "q"),
                ("message", text),
                ("numbers", numbers.as_str()),
                ("flash", "0"),
            ])
            .timeout(TIMEOUT)
            .send()
            .await
            .context("SMS gateway unreachable")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("SMS gateway response {}: {}", status, body);
        if status != reqwest::StatusCode::OK {
            bail!("SMS gateway returned {}: {}", status, body);
        }
        Ok(())
    }
}

/// One-line alert text for a node at risk.
pub fn alert_text(
    node_name: &str,
    probability: f64,
    temperature: f64,
    humidity: f64,
    rain: f64,
    cloud_cover: f64,
    altitude_m: Option<f64>,
) -> String {
    // ---
    let altitude = altitude_m
        .map(|a| format!("{a:.1}m"))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "{node_name}: Cloudburst Risk {:.1}%. T:{temperature:.1}C H:{humidity:.0}% R:{rain:.2}mm C:{cloud_cover:.0}% Alt:{altitude}",
        probability * 100.0
    )
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_recipients_joined_with_commas() {
        // ---
        let notifier = SmsNotifier::new(
            Client::new(),
            "https://sms.invalid/dev/bulkV2",
            "key".into(),
            vec!["919000000001".into(), "919000000002".into()],
        );
        assert_eq!(notifier.numbers(), "919000000001,919000000002");
    }

    #[test]
    fn test_alert_text() {
        // ---
        let text = alert_text("Node 2 - Uttarkashi", 0.6234, 18.26, 94.4, 3.456, 99.6, Some(1021.37));
        assert_eq!(
            text,
            "Node 2 - Uttarkashi: Cloudburst Risk 62.3%. T:18.3C H:94% R:3.46mm C:100% Alt:1021.4m"
        );
    }

    #[test]
    fn test_alert_text_without_altitude() {
        // ---
        let text = alert_text("Node 1", 0.5, 20.0, 80.0, 0.0, 50.0, None);
        assert!(text.ends_with("Alt:n/a"));
    }

    #[tokio::test]
    async fn test_send_without_recipients_fails() {
        // ---
        let notifier = SmsNotifier::new(Client::new(), "https://sms.invalid", "key".into(), Vec::new());
        tokio_test::assert_err!(notifier.send("hello").await);
    }
}
