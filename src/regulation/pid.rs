//! Absolute-target PID regulator
//!
//! Accumulates a target current and nudges it by a PID step on every grid
//! sample. Grid power is smoothed exponentially before the error is formed,
//! and the integral term is zeroed whenever the target saturates.

use super::{NOMINAL_VOLTAGE, RegulationInput, RegulationOutput, Regulator};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Current seeded at most on a bootstrap start (A)
const BOOTSTRAP_MAX_CURRENT: f64 = 10.0;

/// PID regulator tuning
#[derive(Debug, Clone, Serialize)]
pub struct PidSettings {
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

    /// Surplus required before a bootstrap start (W)
    pub surplus_threshold: f64,

    /// Import above which charge is reduced aggressively (W)
    pub import_threshold: f64,
}

#[derive(Debug, Default)]
struct PidState {
    previous_error: f64,
    integral_error: f64,
    current_target: f64,
    smoothed_power: f64,
    last_update: Option<DateTime<Utc>>,
    reset_count: u64,
}

/// Absolute-target PID implementation of the regulation service
pub struct PidRegulator {
    settings: PidSettings,
    state: Mutex<PidState>,
    logger: StructuredLogger,
}

impl PidRegulator {
    pub fn new(settings: PidSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(PidState::default()),
            logger: get_logger("pid"),
        }
    }

    fn calculate_off_peak(&self, input: &RegulationInput) -> RegulationOutput {
        // Off-peak: charge up to the house limit, grid power is irrelevant
        let available_power = input.max_house_power;
        let available_current = (available_power / NOMINAL_VOLTAGE).min(input.max_current);

        RegulationOutput {
            target_current: available_current,
            delta_current: 0.0,
            should_charge: available_current > crate::station::MIN_CHARGING_CURRENT,
            reason: "Off-peak mode - maximum charging".to_string(),
            debug: serde_json::json!({
                "available_power": available_power,
                "available_current": available_current,
                "mode": "HC",
            }),
        }
    }

    fn calculate_on_peak(&self, input: &RegulationInput) -> RegulationOutput {
        let mut state = self.state.lock().expect("pid state poisoned");

        Self::update_smoothed_power(&mut state, &self.settings, input.grid_power, input.timestamp);

        // error > 0 = import (bad), error < 0 = surplus (good)
        let error = state.smoothed_power - input.target_power;

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

        let pid_raw = self.step(&mut state, error, dt);
        let pid_safe = self.apply_safety_checks(&mut state, pid_raw, error, input.max_current);

        state.last_update = Some(input.timestamp);

        let reason = if error > self.settings.import_threshold {
            "Grid import detected - reducing charge"
        } else if error < -self.settings.surplus_threshold {
            "Surplus solar detected - charging"
        } else if error > 0.0 {
            "Small import - maintaining charge"
        } else {
            "Near equilibrium - maintaining"
        };

        self.logger.debug(&format!(
            "Power={:.1}W, Error={:.1}W, Target={:.1}A, dt={:.1}s",
            state.smoothed_power, error, pid_safe, dt
        ));

        RegulationOutput {
            target_current: pid_safe,
            delta_current: 0.0,
            should_charge: pid_safe > crate::station::MIN_CHARGING_CURRENT,
            reason: reason.to_string(),
            debug: serde_json::json!({
                "grid_power": input.grid_power,
                "smoothed_power": state.smoothed_power,
                "error": error,
                "pid_raw": pid_raw,
                "pid_safe": pid_safe,
                "dt": dt,
                "previous_error": state.previous_error,
                "integral_error": state.integral_error,
                "mode": "HP",
            }),
        }
    }

    fn update_smoothed_power(
        state: &mut PidState,
        settings: &PidSettings,
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

        // First sample after startup initializes directly
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

    fn step(&self, state: &mut PidState, error: f64, dt: f64) -> f64 {
        state.integral_error += error * dt;
        let derivative = (error - state.previous_error) / dt;

        let pid_output_current = self.settings.kp * error / NOMINAL_VOLTAGE
            + self.settings.ki * state.integral_error / NOMINAL_VOLTAGE
            + self.settings.kd * derivative / NOMINAL_VOLTAGE;

        // A large surplus against an idle target jumps straight to a usable
        // current instead of ramping up from zero.
        if error < -self.settings.surplus_threshold && state.current_target == 0.0 {
            let start_current = ((-error) / NOMINAL_VOLTAGE).min(BOOTSTRAP_MAX_CURRENT);
            state.current_target = start_current;
            self.logger.debug(&format!(
                "Bootstrap start with {:.1}A due to surplus",
                start_current
            ));
        } else {
            state.current_target += pid_output_current;
        }

        state.previous_error = error;

        state.current_target
    }

    fn apply_safety_checks(
        &self,
        state: &mut PidState,
        mut pid_output: f64,
        error: f64,
        max_current: f64,
    ) -> f64 {
        if pid_output < 0.0 {
            pid_output = 0.0;
            state.integral_error = 0.0; // Anti-windup
        }
        if pid_output > max_current {
            pid_output = max_current;
            state.integral_error = 0.0; // Anti-windup
        }

        // Real import while a target is set: shed load faster than the
        // integral would
        if error > self.settings.import_threshold && state.current_target > 0.0 {
            let reduction = (error / 500.0).min(pid_output * 0.8);
            pid_output = (pid_output - reduction).max(0.0);
            state.integral_error = 0.0;
            self.logger.debug(&format!(
                "Import detected ({:.0}W), reducing charge by {:.1}A",
                error, reduction
            ));
        }

        state.current_target = pid_output;
        pid_output
    }

    fn reset_state(state: &mut PidState, logger: &StructuredLogger) {
        state.previous_error = 0.0;
        state.integral_error = 0.0;
        state.current_target = 0.0;
        state.reset_count += 1;
        logger.info(&format!("PID controller reset (count: {})", state.reset_count));
    }
}

impl Regulator for PidRegulator {
    fn calculate(&self, input: &RegulationInput) -> RegulationOutput {
        if input.is_off_peak {
            return self.calculate_off_peak(input);
        }
        self.calculate_on_peak(input)
    }

    fn reset(&self) {
        let mut state = self.state.lock().expect("pid state poisoned");
        Self::reset_state(&mut state, &self.logger);
    }

    fn name(&self) -> &'static str {
        "PID Regulator"
    }

    fn status(&self) -> serde_json::Value {
        let state = self.state.lock().expect("pid state poisoned");
        serde_json::json!({
            "name": self.name(),
            "settings": self.settings,
            "previous_error": state.previous_error,
            "integral_error": state.integral_error,
            "current_target": state.current_target,
            "smoothed_power": state.smoothed_power,
            "last_update": state.last_update,
            "reset_count": state.reset_count,
        })
    }
}
