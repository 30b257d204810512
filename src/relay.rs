//! Actuator relay commands over MQTT.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS, Transport};
use tokio::task::JoinHandle;

// ---

/// Fire-and-forget publisher of short relay commands.
#[async_trait]
pub trait RelayPublisher: Send + Sync {
    async fn publish(&self, payload: &str) -> Result<()>;
}

/// Connection settings for the relay broker.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub topic: String,
}

pub struct MqttRelay {
    client: AsyncClient,
    topic: String,
}

impl MqttRelay {
    /// Create the client and spawn its event loop. The loop reconnects on its
    /// own; publishes made while disconnected queue up in the client.
    pub fn start(settings: &MqttSettings) -> (Self, JoinHandle<()>) {
        // ---
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.clone().unwrap_or_default());
        }
        if settings.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let host = settings.host.clone();
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    tracing::warn!("MQTT connection to {} failed: {}", host, err);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        });

        let relay = Self {
            client,
            topic: settings.topic.clone(),
        };
        (relay, handle)
    }
}

#[async_trait]
impl RelayPublisher for MqttRelay {
    async fn publish(&self, payload: &str) -> Result<()> {
        // ---
        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}
