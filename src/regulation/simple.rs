//! Simple on/off regulator
//!
//! All-or-nothing control with a hysteresis margin between the start and
//! stop thresholds. No integral, no smoothing; useful as a baseline and on
//! installations where the production curve is flat.

use super::{NOMINAL_VOLTAGE, RegulationInput, RegulationOutput, Regulator};
use crate::logging::{StructuredLogger, get_logger};
use serde::Serialize;
use std::sync::Mutex;

/// On/off regulator tuning
#[derive(Debug, Clone, Serialize)]
pub struct SimpleSettings {
    /// Surplus required to start charging (W)
    pub surplus_threshold: f64,

    /// Margin subtracted from the start threshold for the stop decision (W)
    pub hysteresis_margin: f64,
}

/// On/off implementation of the regulation service
pub struct SimpleRegulator {
    settings: SimpleSettings,
    is_charging: Mutex<bool>,
    logger: StructuredLogger,
}

impl SimpleRegulator {
    pub fn new(settings: SimpleSettings) -> Self {
        Self {
            settings,
            is_charging: Mutex::new(false),
            logger: get_logger("simple"),
        }
    }

    fn calculate_on_peak(&self, input: &RegulationInput) -> RegulationOutput {
        let mut is_charging = self.is_charging.lock().expect("simple state poisoned");

        let target_current;
        let reason;

        if !*is_charging {
            if input.grid_power < -self.settings.surplus_threshold {
                let surplus_power = -input.grid_power;
                target_current = (surplus_power / NOMINAL_VOLTAGE).min(input.max_current);
                *is_charging = true;
                reason = "Starting charge - surplus detected";
            } else {
                target_current = 0.0;
                reason = "No surplus - staying stopped";
            }
        } else {
            let stop_threshold =
                -(self.settings.surplus_threshold - self.settings.hysteresis_margin);
            if input.grid_power > stop_threshold {
                target_current = 0.0;
                *is_charging = false;
                reason = "No more surplus - stopping charge";
            } else {
                let surplus_power = -input.grid_power;
                target_current = (surplus_power / NOMINAL_VOLTAGE).min(input.max_current);
                reason = "Continuing charge - surplus available";
            }
        }

        self.logger.debug(&format!(
            "Power={:.1}W, Target={:.1}A, Charging={}",
            input.grid_power, target_current, *is_charging
        ));

        RegulationOutput {
            target_current,
            delta_current: 0.0,
            should_charge: target_current > crate::station::MIN_CHARGING_CURRENT,
            reason: reason.to_string(),
            debug: serde_json::json!({
                "grid_power": input.grid_power,
                "surplus_threshold": self.settings.surplus_threshold,
                "hysteresis_margin": self.settings.hysteresis_margin,
                "is_charging": *is_charging,
                "mode": "HP",
            }),
        }
    }
}

impl Regulator for SimpleRegulator {
    fn calculate(&self, input: &RegulationInput) -> RegulationOutput {
        if input.is_off_peak {
            let available_current =
                (input.max_house_power / NOMINAL_VOLTAGE).min(input.max_current);

            return RegulationOutput {
                target_current: available_current,
                delta_current: 0.0,
                should_charge: available_current > crate::station::MIN_CHARGING_CURRENT,
                reason: "Off-peak mode - maximum charging".to_string(),
                debug: serde_json::json!({
                    "mode": "HC",
                    "available_current": available_current,
                }),
            };
        }

        self.calculate_on_peak(input)
    }

    fn reset(&self) {
        let mut is_charging = self.is_charging.lock().expect("simple state poisoned");
        *is_charging = false;
        self.logger.info("Simple regulator reset");
    }

    fn name(&self) -> &'static str {
        "Simple On/Off Regulator"
    }

    fn status(&self) -> serde_json::Value {
        let is_charging = self.is_charging.lock().expect("simple state poisoned");
        serde_json::json!({
            "name": self.name(),
            "settings": self.settings,
            "is_charging": *is_charging,
        })
    }
}
