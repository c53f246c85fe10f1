//! Configuration management for Helion
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable
//! overrides for the message-bus credentials.

use crate::error::{HelionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener binding for station sessions and the status API
    pub server: ServerConfig,

    /// Message-bus connection and topic bindings
    pub mqtt: MqttConfig,

    /// Charging and regulation parameters
    pub charging: ChargingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Listener binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

/// Message-bus connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker address, either `host:port` or `tcp://host:port`
    pub broker: String,

    /// Broker username (override with MQTT_USERNAME)
    pub username: String,

    /// Broker password (override with MQTT_PASSWORD)
    pub password: String,

    /// Subscribed topics
    pub topics: TopicsConfig,
}

/// Topic bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// Grid power measurements (watts, signed)
    pub grid_power: String,

    /// Off-peak/on-peak tariff state
    pub hphc_state: String,
}

/// Charging and regulation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargingConfig {
    /// Regulator variant: pid, delta_pid, openevse or simple
    pub regulator: String,

    /// Total current budget across all stations (A)
    pub max_total_current: f64,

    /// Household power ceiling used in off-peak mode (W)
    pub max_house_power: f64,

    /// Grid power set-point the regulators track (W)
    pub grid_target_power: f64,

    /// Time constant for exponential smoothing of grid power (s)
    pub smoothing_factor: f64,

    /// Legacy ticker period (s); retained for config compatibility
    pub update_interval: u64,

    /// Priority of station1 (lower = served first)
    pub station1_priority: i32,

    /// Priority of station2
    pub station2_priority: i32,

    /// PID proportional gain
    pub pid_kp: f64,

    /// PID integral gain
    pub pid_ki: f64,

    /// PID derivative gain
    pub pid_kd: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Directory for rotated log files
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format for the file sink
    pub json_format: bool,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration with an optional explicit override path.
    ///
    /// When `override_path` is provided, the configuration is loaded strictly
    /// from that path and any error (including file-not-found) is returned
    /// without falling back to default search locations.
    pub fn load_with_override<P: AsRef<Path>>(override_path: Option<P>) -> Result<Self> {
        if let Some(p) = override_path {
            return Self::from_file(p);
        }
        Self::load()
    }

    /// Load configuration from default search locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "helion_config.yaml",
            "/data/helion_config.yaml",
            "/etc/helion/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Environment variables win over file values for bus credentials
    fn apply_env_overrides(&mut self) {
        if let Ok(broker) = std::env::var("MQTT_BROKER") {
            if !broker.is_empty() {
                self.mqtt.broker = broker;
            }
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            if !username.is_empty() {
                self.mqtt.username = username;
            }
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            if !password.is_empty() {
                self.mqtt.password = password;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(HelionError::validation(
                "server.port",
                "Port must be greater than 0",
            ));
        }

        if self.mqtt.broker.is_empty() {
            return Err(HelionError::validation(
                "mqtt.broker",
                "Broker address cannot be empty",
            ));
        }

        if self.charging.max_total_current <= 0.0 {
            return Err(HelionError::validation(
                "charging.max_total_current",
                "Must be positive",
            ));
        }

        if self.charging.max_house_power <= 0.0 {
            return Err(HelionError::validation(
                "charging.max_house_power",
                "Must be positive",
            ));
        }

        if self.charging.smoothing_factor <= 0.0 {
            return Err(HelionError::validation(
                "charging.smoothing_factor",
                "Must be positive",
            ));
        }

        match self.charging.regulator.as_str() {
            "pid" | "delta_pid" | "openevse" | "simple" => {}
            other => {
                return Err(HelionError::validation(
                    "charging.regulator",
                    &format!("Unknown regulator variant: {}", other),
                ));
            }
        }

        Ok(())
    }
}
