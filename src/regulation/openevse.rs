//! Hysteresis/time-based regulator in the style of OpenEVSE solar divert
//!
//! Instead of a closed-loop error controller this variant tracks smoothed
//! excess power with asymmetric attack/decay time constants and switches
//! charging through dual thresholds plus a minimum-charge dwell timer.

use super::{NOMINAL_VOLTAGE, RegulationInput, RegulationOutput, Regulator};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Hard ceiling on the computed target (A)
const MAX_TARGET_CURRENT: f64 = 40.0;

/// Hysteresis regulator tuning
#[derive(Debug, Clone, Serialize)]
pub struct OpenEvseSettings {
    /// Power held back from the excess to avoid grid import (W)
    pub reserve_power_w: f64,

    /// Extra margin above the start threshold (W)
    pub hysteresis_power_w: f64,

    /// Dwell time before a started charge may stop (s)
    pub min_charge_time_s: f64,

    /// Smoothing time constant while excess rises (s)
    pub smoothing_attack_s: f64,

    /// Smoothing time constant while excess falls (s)
    pub smoothing_decay_s: f64,

    /// Excess required to start charging (W)
    pub min_charge_power_w: f64,

    /// Nominal sample period used when no previous sample exists (s)
    pub poll_interval_s: f64,

    /// Bound on the emitted correction per step (A)
    pub max_delta_per_step_a: f64,
}

#[derive(Debug, Default)]
struct OpenEvseState {
    is_charging: bool,
    charging_start: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    smoothed_excess: f64,
    last_target: f64,
    activation_count: u64,
    deactivation_count: u64,
}

/// Hysteresis/time-based implementation of the regulation service
pub struct OpenEvseRegulator {
    settings: OpenEvseSettings,
    state: Mutex<OpenEvseState>,
    logger: StructuredLogger,
}

impl OpenEvseRegulator {
    pub fn new(settings: OpenEvseSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(OpenEvseState::default()),
            logger: get_logger("openevse"),
        }
    }

    fn calculate_off_peak(&self, input: &RegulationInput) -> RegulationOutput {
        let available_power = input.max_house_power;
        let target_current = (available_power / NOMINAL_VOLTAGE).min(input.max_current);

        let delta_current = (target_current - input.current_charging).clamp(
            -self.settings.max_delta_per_step_a,
            self.settings.max_delta_per_step_a,
        );

        RegulationOutput {
            target_current,
            delta_current,
            should_charge: target_current > crate::station::MIN_CHARGING_CURRENT,
            reason: "Off-peak mode - maximum charging".to_string(),
            debug: serde_json::json!({
                "mode": "HC",
                "target_current": target_current,
                "delta": delta_current,
                "available_power": available_power,
            }),
        }
    }

    fn calculate_on_peak(&self, input: &RegulationInput) -> RegulationOutput {
        let mut state = self.state.lock().expect("openevse state poisoned");

        let mut dt = match state.last_update {
            Some(last) => (input.timestamp - last).num_milliseconds() as f64 / 1000.0,
            None => self.settings.poll_interval_s,
        };
        if dt <= 0.0 {
            dt = self.settings.poll_interval_s;
        }

        // Excess = grid surplus plus the power we are already diverting
        let charging_power = input.current_charging * NOMINAL_VOLTAGE;
        let excess_power = -input.grid_power + charging_power;

        self.update_smoothed_excess(&mut state, excess_power, dt);

        let mut delta_current;
        let reason;
        let should_charge;

        if !state.is_charging {
            let start_threshold =
                self.settings.min_charge_power_w + self.settings.hysteresis_power_w;
            if state.smoothed_excess > start_threshold {
                should_charge = true;
                state.is_charging = true;
                state.charging_start = Some(input.timestamp);
                state.activation_count += 1;

                let target_current = self.target_from_excess(state.smoothed_excess);
                delta_current = target_current - input.current_charging;
                reason = "Starting charge - sufficient solar excess";

                self.logger.info(&format!(
                    "Starting charge - excess: {:.0}W, target: {:.1}A",
                    state.smoothed_excess, target_current
                ));
            } else {
                should_charge = false;
                delta_current = 0.0;
                reason = if state.smoothed_excess > 0.0 {
                    "Insufficient surplus for charging"
                } else {
                    "Grid import detected - no charging"
                };
            }
        } else {
            let time_since_start = state
                .charging_start
                .map(|start| (input.timestamp - start).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0);

            if state.smoothed_excess < self.settings.reserve_power_w
                && time_since_start > self.settings.min_charge_time_s
            {
                should_charge = false;
                state.is_charging = false;
                state.deactivation_count += 1;
                delta_current = -input.current_charging;
                reason = "Stopping charge - insufficient excess power";

                self.logger.info(&format!(
                    "Stopping charge after {:.1}s - excess: {:.0}W",
                    time_since_start, state.smoothed_excess
                ));
            } else {
                should_charge = true;
                let target_current = self.target_from_excess(state.smoothed_excess);

                // Rate-limit the ramp so the setpoint follows production
                // instead of chasing every cloud
                let raw_delta = target_current - input.current_charging;
                delta_current = self.rate_limited(raw_delta, dt);

                reason = if time_since_start < self.settings.min_charge_time_s {
                    "Maintaining charge - within minimum time"
                } else {
                    "Adjusting charge rate - following solar production"
                };
            }
        }

        delta_current = delta_current.clamp(
            -self.settings.max_delta_per_step_a,
            self.settings.max_delta_per_step_a,
        );

        state.last_update = Some(input.timestamp);
        state.last_target = input.current_charging + delta_current;

        let time_since_start = state
            .charging_start
            .map(|start| (input.timestamp - start).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        RegulationOutput {
            target_current: state.last_target,
            delta_current,
            should_charge,
            reason: reason.to_string(),
            debug: serde_json::json!({
                "mode": "HP_OpenEVSE",
                "excess_power": excess_power,
                "smoothed_excess": state.smoothed_excess,
                "is_charging": state.is_charging,
                "time_since_start": time_since_start,
                "activation_count": state.activation_count,
                "deactivation_count": state.deactivation_count,
                "dt": dt,
                "delta": delta_current,
            }),
        }
    }

    /// Two-sided exponential smoothing: fast attack, slow decay
    fn update_smoothed_excess(&self, state: &mut OpenEvseState, excess_power: f64, dt: f64) {
        if state.last_update.is_none() {
            state.smoothed_excess = excess_power;
            return;
        }

        let time_constant = if excess_power > state.smoothed_excess {
            self.settings.smoothing_attack_s
        } else {
            self.settings.smoothing_decay_s
        };

        let alpha = 1.0 - (-dt / time_constant).exp();
        state.smoothed_excess = alpha * excess_power + (1.0 - alpha) * state.smoothed_excess;
    }

    /// Target current from available excess after the reserve; below the
    /// EVSE minimum a session cannot be sustained, so the target is zero.
    fn target_from_excess(&self, excess_power: f64) -> f64 {
        let available_power = excess_power - self.settings.reserve_power_w;
        if available_power <= 0.0 {
            return 0.0;
        }

        let target_current = available_power / NOMINAL_VOLTAGE;
        if target_current < crate::station::MIN_CHARGING_CURRENT {
            return 0.0;
        }

        target_current.min(MAX_TARGET_CURRENT)
    }

    /// Bound the change rate to `max_delta_per_step / poll_interval` A/s
    fn rate_limited(&self, raw_delta: f64, dt: f64) -> f64 {
        let max_rate = self.settings.max_delta_per_step_a / self.settings.poll_interval_s;
        let max_delta_this_step = max_rate * dt;
        raw_delta.clamp(-max_delta_this_step, max_delta_this_step)
    }
}

impl Regulator for OpenEvseRegulator {
    fn calculate(&self, input: &RegulationInput) -> RegulationOutput {
        if input.is_off_peak {
            return self.calculate_off_peak(input);
        }
        self.calculate_on_peak(input)
    }

    fn reset(&self) {
        let mut state = self.state.lock().expect("openevse state poisoned");
        state.is_charging = false;
        state.charging_start = None;
        state.smoothed_excess = 0.0;
        state.last_target = 0.0;
        self.logger.info("OpenEVSE regulator reset");
    }

    fn name(&self) -> &'static str {
        "OpenEVSE-style Regulator"
    }

    fn status(&self) -> serde_json::Value {
        let state = self.state.lock().expect("openevse state poisoned");
        serde_json::json!({
            "name": self.name(),
            "settings": self.settings,
            "is_charging": state.is_charging,
            "charging_start": state.charging_start,
            "smoothed_excess_power": state.smoothed_excess,
            "last_target_current": state.last_target,
            "activation_count": state.activation_count,
            "deactivation_count": state.deactivation_count,
            "last_update": state.last_update,
        })
    }
}
