use super::*;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost:1883".to_string(),
            username: String::new(),
            password: String::new(),
            topics: TopicsConfig::default(),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            grid_power: "home/grid/power".to_string(),
            hphc_state: "home/tariff/hphc".to_string(),
        }
    }
}

impl Default for ChargingConfig {
    fn default() -> Self {
        Self {
            regulator: "delta_pid".to_string(),
            max_total_current: 40.0,
            max_house_power: 12000.0,
            grid_target_power: 0.0,
            smoothing_factor: 0.1,
            update_interval: 5,
            station1_priority: 1,
            station2_priority: 2,
            pid_kp: 0.002,
            pid_ki: 0.0005,
            pid_kd: 0.00002,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/helion".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            mqtt: MqttConfig::default(),
            charging: ChargingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
