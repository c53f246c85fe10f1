//! Incremental (delta) PID regulator
//!
//! Unlike the absolute variant this one regulates *total* system power,
//! charging included, and emits a signed correction per step. The charging
//! manager owns the baseline; the regulator only says how far to move.

use super::{NOMINAL_VOLTAGE, RegulationInput, RegulationOutput, Regulator};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Delta-PID regulator tuning
#[derive(Debug, Clone, Serialize)]
pub struct DeltaPidSettings {
    /// Proportional gain
    pub kp: f64,

    /// Integral gain
    pub ki: f64,

    /// Derivative gain
    pub kd: f64,

    /// Smoothing time constant for grid power (s)
    pub smoothing_factor: f64,

    /// Gap between samples that forces a controller reset (s)
    pub max_time_gap: f64,

    /// Surplus required before charging may start (W)
    pub surplus_threshold: f64,

    /// Import above which charge is reduced aggressively (W)
    pub import_threshold: f64,

    /// Bound on the emitted correction per step (A)
    pub max_delta_per_step: f64,
}

#[derive(Debug, Default)]
struct DeltaPidState {
    previous_error: f64,
    integral_error: f64,
    smoothed_power: f64,
    last_update: Option<DateTime<Utc>>,
    reset_count: u64,
}

/// Delta-output PID implementation of the regulation service
pub struct DeltaPidRegulator {
    settings: DeltaPidSettings,
    state: Mutex<DeltaPidState>,
    logger: StructuredLogger,
}

impl DeltaPidRegulator {
    pub fn new(settings: DeltaPidSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(DeltaPidState::default()),
            logger: get_logger("delta_pid"),
        }
    }

    fn calculate_off_peak(&self, input: &RegulationInput) -> RegulationOutput {
        let available_power = input.max_house_power;
        let target_current = (available_power / NOMINAL_VOLTAGE).min(input.max_current);

        // Walk to the off-peak target in bounded steps
        let delta_current = (target_current - input.current_charging).clamp(
            -self.settings.max_delta_per_step,
            self.settings.max_delta_per_step,
        );

        RegulationOutput {
            target_current,
            delta_current,
            should_charge: target_current > crate::station::MIN_CHARGING_CURRENT,
            reason: "Off-peak mode - adjusting to maximum charging".to_string(),
            debug: serde_json::json!({
                "available_power": available_power,
                "target_current": target_current,
                "current_charging": input.current_charging,
                "delta": delta_current,
                "mode": "HC",
            }),
        }
    }

    fn calculate_on_peak(&self, input: &RegulationInput) -> RegulationOutput {
        let mut state = self.state.lock().expect("delta pid state poisoned");

        Self::update_smoothed_power(&mut state, &self.settings, input.grid_power, input.timestamp);

        let charging_power = input.current_charging * NOMINAL_VOLTAGE;

        // Error over total system power: negative = surplus, positive = import
        let error = state.smoothed_power + charging_power - input.target_power;

        let mut dt = match state.last_update {
            Some(last) => (input.timestamp - last).num_milliseconds() as f64 / 1000.0,
            None => 1.0,
        };

        if dt > self.settings.max_time_gap {
            self.logger.warn(&format!(
                "Large time gap ({:.1}s), resetting controller",
                dt
            ));
            Self::reset_state(&mut state, &self.logger);
            dt = 1.0;
        }

        if dt <= 0.0 {
            dt = 1.0;
        }

        let raw_delta = self.step(&mut state, error, dt);
        let delta_current = self.apply_safety_limits(&mut state, raw_delta, error, input);

        state.last_update = Some(input.timestamp);

        let should_charge =
            input.current_charging > 0.0 || error < -self.settings.surplus_threshold;

        let reason = if error > self.settings.import_threshold {
            "Grid import detected - reducing charge"
        } else if error < -self.settings.surplus_threshold {
            "Surplus solar detected - increasing charge"
        } else if error.abs() < 50.0 {
            "Near equilibrium - maintaining"
        } else if error > 0.0 {
            "Small import - slight reduction"
        } else {
            "Small surplus - slight increase"
        };

        self.logger.debug(&format!(
            "Power={:.1}W, ChargingPower={:.1}W, Error={:.1}W, Delta={:.2}A, dt={:.1}s",
            state.smoothed_power, charging_power, error, delta_current, dt
        ));

        RegulationOutput {
            target_current: input.current_charging + delta_current,
            delta_current,
            should_charge,
            reason: reason.to_string(),
            debug: serde_json::json!({
                "grid_power": input.grid_power,
                "smoothed_power": state.smoothed_power,
                "charging_power": charging_power,
                "current_charging": input.current_charging,
                "error": error,
                "delta_current": delta_current,
                "dt": dt,
                "previous_error": state.previous_error,
                "integral_error": state.integral_error,
                "mode": "HP",
            }),
        }
    }

    fn update_smoothed_power(
        state: &mut DeltaPidState,
        settings: &DeltaPidSettings,
        power: f64,
        timestamp: DateTime<Utc>,
    ) {
        let dt = match state.last_update {
            Some(last) => (timestamp - last).num_milliseconds() as f64 / 1000.0,
            None => {
                state.smoothed_power = power;
                return;
            }
        };

        if state.smoothed_power == 0.0 && dt < 1.0 {
            state.smoothed_power = power;
            return;
        }

        if dt > 0.0 {
            let alpha = 1.0 - (-dt / settings.smoothing_factor).exp();
            state.smoothed_power = alpha * power + (1.0 - alpha) * state.smoothed_power;
        } else {
            state.smoothed_power = power;
        }
    }

    fn step(&self, state: &mut DeltaPidState, error: f64, dt: f64) -> f64 {
        state.integral_error += error * dt;
        let derivative = (error - state.previous_error) / dt;

        let delta_current = self.settings.kp * error / NOMINAL_VOLTAGE
            + self.settings.ki * state.integral_error / NOMINAL_VOLTAGE
            + self.settings.kd * derivative / NOMINAL_VOLTAGE;

        state.previous_error = error;

        delta_current
    }

    fn apply_safety_limits(
        &self,
        state: &mut DeltaPidState,
        mut delta_current: f64,
        error: f64,
        input: &RegulationInput,
    ) -> f64 {
        delta_current = delta_current.clamp(
            -self.settings.max_delta_per_step,
            self.settings.max_delta_per_step,
        );

        // Projected total must stay inside [0, max_current]
        let new_current = input.current_charging + delta_current;
        if new_current < 0.0 {
            delta_current = -input.current_charging;
            state.integral_error = 0.0; // Anti-windup
        }
        if new_current > input.max_current {
            delta_current = input.max_current - input.current_charging;
            state.integral_error = 0.0; // Anti-windup
        }

        // Real import while charging: force a reduction of a minimum size
        if error > self.settings.import_threshold && input.current_charging > 0.0 {
            let aggressive_reduction = (error / 500.0).min(input.current_charging * 0.5);
            if delta_current > -aggressive_reduction {
                delta_current = -aggressive_reduction;
            }
            state.integral_error = 0.0;
            self.logger.debug(&format!(
                "Import detected ({:.0}W), aggressive reduction {:.1}A",
                error, aggressive_reduction
            ));
        }

        delta_current
    }

    fn reset_state(state: &mut DeltaPidState, logger: &StructuredLogger) {
        state.previous_error = 0.0;
        state.integral_error = 0.0;
        state.reset_count += 1;
        logger.info(&format!(
            "Delta PID controller reset (count: {})",
            state.reset_count
        ));
    }
}

impl Regulator for DeltaPidRegulator {
    fn calculate(&self, input: &RegulationInput) -> RegulationOutput {
        if input.is_off_peak {
            return self.calculate_off_peak(input);
        }
        self.calculate_on_peak(input)
    }

    fn reset(&self) {
        let mut state = self.state.lock().expect("delta pid state poisoned");
        Self::reset_state(&mut state, &self.logger);
    }

    fn name(&self) -> &'static str {
        "Delta PID Regulator"
    }

    fn status(&self) -> serde_json::Value {
        let state = self.state.lock().expect("delta pid state poisoned");
        serde_json::json!({
            "name": self.name(),
            "settings": self.settings,
            "previous_error": state.previous_error,
            "integral_error": state.integral_error,
            "smoothed_power": state.smoothed_power,
            "last_update": state.last_update,
            "reset_count": state.reset_count,
        })
    }
}
