//! Message-bus ingress
//!
//! Subscribes to the grid-power and tariff topics, parses both plain and
//! structured payloads, updates the measurement cells and wakes the
//! charging manager. Malformed payloads are dropped with a logged error and
//! the previous cell value is retained. Subscriptions are re-established on
//! every reconnect.

use crate::config::MqttConfig;
use crate::error::{HelionError, Result};
use crate::logging::{StructuredLogger, get_logger};
use crate::manager::ChargingManager;
use crate::measurement::{GridData, TariffState};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Structured grid-power payload
#[derive(Debug, Deserialize)]
struct GridPowerMessage {
    power: f64,

    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<String>,
}

/// Structured tariff payload
#[derive(Debug, Deserialize)]
struct HphcMessage {
    state: String,
}

/// Parse a grid-power payload: structured JSON or plain decimal watts
pub fn parse_grid_power(payload: &str) -> Result<f64> {
    if let Ok(msg) = serde_json::from_str::<GridPowerMessage>(payload) {
        return Ok(msg.power);
    }

    payload
        .trim()
        .parse::<f64>()
        .map_err(|e| HelionError::mqtt(format!("Invalid grid power payload: {}", e)))
}

/// Parse a tariff payload; `true` means off-peak (HC)
pub fn parse_tariff(payload: &str) -> Result<bool> {
    if let Ok(msg) = serde_json::from_str::<HphcMessage>(payload) {
        return match msg.state.as_str() {
            "HC" | "off-peak" => Ok(true),
            "HP" => Ok(false),
            other => Err(HelionError::mqtt(format!(
                "Invalid tariff state: {}",
                other
            ))),
        };
    }

    match payload.trim() {
        "HC" | "off-peak" | "1" | "true" => Ok(true),
        "HP" | "0" | "false" => Ok(false),
        other => Err(HelionError::mqtt(format!(
            "Invalid tariff payload: {}",
            other
        ))),
    }
}

/// Split a broker address of the form `host:port`, with an optional
/// `tcp://` or `mqtt://` scheme prefix
pub fn parse_broker(broker: &str) -> Result<(String, u16)> {
    let trimmed = broker
        .strip_prefix("tcp://")
        .or_else(|| broker.strip_prefix("mqtt://"))
        .unwrap_or(broker);

    match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| HelionError::config(format!("Invalid broker port: {}", e)))?;
            Ok((host.to_string(), port))
        }
        None => Ok((trimmed.to_string(), 1883)),
    }
}

/// Long-lived bus client feeding the measurement cells
pub struct MqttIngress {
    config: MqttConfig,
    grid: Arc<GridData>,
    tariff: Arc<TariffState>,
    manager: Arc<ChargingManager>,
    logger: StructuredLogger,
}

impl MqttIngress {
    pub fn new(
        config: MqttConfig,
        grid: Arc<GridData>,
        tariff: Arc<TariffState>,
        manager: Arc<ChargingManager>,
    ) -> Self {
        Self {
            config,
            grid,
            tariff,
            manager,
            logger: get_logger("mqtt"),
        }
    }

    /// Run the delivery loop until shutdown. Connection errors are absorbed
    /// with a retry pause; only invalid broker configuration is fatal.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let (host, port) = parse_broker(&self.config.broker)?;

        let mut options = MqttOptions::new("helion", host, port);
        options.set_keep_alive(Duration::from_secs(60));
        if !self.config.username.is_empty() {
            options.set_credentials(self.config.username.clone(), self.config.password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, 32);

        self.logger.info("Connecting to MQTT broker");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    self.logger.info("Disconnecting from MQTT broker");
                    let _ = client.disconnect().await;
                    break;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        self.logger.info("MQTT connected, subscribing to topics");
                        self.subscribe(&client).await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload);
                        self.handle_message(&publish.topic, &payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.logger.error(&format!("MQTT connection error: {}", e));
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&self, client: &AsyncClient) {
        for topic in [
            self.config.topics.grid_power.as_str(),
            self.config.topics.hphc_state.as_str(),
        ] {
            if topic.is_empty() {
                continue;
            }
            match client.subscribe(topic, QoS::AtLeastOnce).await {
                Ok(()) => self.logger.info(&format!("Subscribed to topic: {}", topic)),
                Err(e) => self
                    .logger
                    .error(&format!("Failed to subscribe to {}: {}", topic, e)),
            }
        }
    }

    fn handle_message(&self, topic: &str, payload: &str) {
        if topic == self.config.topics.grid_power {
            match parse_grid_power(payload) {
                Ok(power) => {
                    self.grid.update(power, Utc::now());
                    self.logger
                        .debug(&format!("Grid power updated: {:.2}W", power));
                    self.manager.on_grid_power_update();
                }
                Err(e) => {
                    self.logger
                        .error(&format!("Failed to parse grid power value: {}", e));
                }
            }
        } else if topic == self.config.topics.hphc_state {
            match parse_tariff(payload) {
                Ok(is_off_peak) => {
                    self.tariff.update(is_off_peak, Utc::now());
                    let state = if is_off_peak { "HC" } else { "HP" };
                    self.logger
                        .info(&format!("Tariff state updated: {}", state));
                }
                Err(e) => {
                    self.logger
                        .error(&format!("Failed to parse tariff value: {}", e));
                }
            }
        }
    }
}
