//! Charging regulation algorithms
//!
//! All regulators map a snapshot of the house state to a charging decision
//! through the same capability set: `calculate`, `reset`, `name`, `status`.
//! They never read the clock themselves; the timestamp travels in the input
//! so behavior is deterministic under test. Internal accumulators live
//! behind a mutex, making every variant safe to share across tasks.

use crate::config::ChargingConfig;
use crate::error::{HelionError, Result};
use chrono::{DateTime, Utc};

pub mod delta_pid;
pub mod openevse;
pub mod pid;
pub mod simple;

pub use delta_pid::DeltaPidRegulator;
pub use openevse::OpenEvseRegulator;
pub use pid::PidRegulator;
pub use simple::SimpleRegulator;

/// Nominal single-phase mains voltage used for all W↔A conversions
pub const NOMINAL_VOLTAGE: f64 = 230.0;

/// Snapshot handed to a regulator for one decision
#[derive(Debug, Clone)]
pub struct RegulationInput {
    /// Net grid power (W); positive = import, negative = surplus
    pub grid_power: f64,

    /// Total charging current currently applied across stations (A)
    pub current_charging: f64,

    /// Tariff state; off-peak ignores grid power entirely
    pub is_off_peak: bool,

    /// Total current budget (A)
    pub max_current: f64,

    /// Household power ceiling for off-peak charging (W)
    pub max_house_power: f64,

    /// Grid power set-point (W), typically 0
    pub target_power: f64,

    /// Timestamp of the measurement driving this decision
    pub timestamp: DateTime<Utc>,
}

/// Result of one regulation step
///
/// A regulator either emits an absolute `target_current` or a signed
/// `delta_current` on top of what is already flowing; consumers treat the
/// output as delta-mode whenever `delta_current` is nonzero.
#[derive(Debug, Clone, Default)]
pub struct RegulationOutput {
    /// Absolute target (A); also filled by delta variants for reporting
    pub target_current: f64,

    /// Signed correction (A); zero for absolute-mode variants
    pub delta_current: f64,

    /// Whether charging should be active at all
    pub should_charge: bool,

    /// Human-readable decision summary
    pub reason: String,

    /// Opaque debug map surfaced through the status API
    pub debug: serde_json::Value,
}

/// Common capability set of all regulator variants
pub trait Regulator: Send + Sync {
    /// Compute one decision from the input snapshot
    fn calculate(&self, input: &RegulationInput) -> RegulationOutput;

    /// Zero internal accumulators
    fn reset(&self);

    /// Variant name for logs and status
    fn name(&self) -> &'static str;

    /// Internal state for monitoring
    fn status(&self) -> serde_json::Value;
}

/// Regulator variant selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegulatorKind {
    Pid,
    DeltaPid,
    OpenEvse,
    Simple,
}

impl std::str::FromStr for RegulatorKind {
    type Err = HelionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pid" => Ok(RegulatorKind::Pid),
            "delta_pid" => Ok(RegulatorKind::DeltaPid),
            "openevse" => Ok(RegulatorKind::OpenEvse),
            "simple" => Ok(RegulatorKind::Simple),
            other => Err(HelionError::config(format!(
                "Unknown regulator variant: {}",
                other
            ))),
        }
    }
}

/// Build the configured regulator variant
///
/// Gains and the smoothing time constant come from configuration; the
/// remaining thresholds are fixed per variant.
pub fn create_regulator(kind: RegulatorKind, cfg: &ChargingConfig) -> Box<dyn Regulator> {
    match kind {
        RegulatorKind::Pid => Box::new(PidRegulator::new(pid::PidSettings {
            kp: cfg.pid_kp,
            ki: cfg.pid_ki,
            kd: cfg.pid_kd,
            smoothing_factor: cfg.smoothing_factor,
            max_time_gap: 60.0,
            surplus_threshold: 100.0,
            import_threshold: 50.0,
        })),
        RegulatorKind::DeltaPid => Box::new(DeltaPidRegulator::new(delta_pid::DeltaPidSettings {
            kp: cfg.pid_kp,
            ki: cfg.pid_ki,
            kd: cfg.pid_kd,
            smoothing_factor: cfg.smoothing_factor,
            max_time_gap: 60.0,
            surplus_threshold: 200.0,
            import_threshold: 100.0,
            max_delta_per_step: 5.0,
        })),
        RegulatorKind::OpenEvse => Box::new(OpenEvseRegulator::new(openevse::OpenEvseSettings {
            reserve_power_w: 100.0,
            hysteresis_power_w: 600.0,
            min_charge_time_s: 300.0,
            smoothing_attack_s: 30.0,
            smoothing_decay_s: 120.0,
            min_charge_power_w: 1400.0,
            poll_interval_s: 10.0,
            max_delta_per_step_a: 3.0,
        })),
        RegulatorKind::Simple => Box::new(SimpleRegulator::new(simple::SimpleSettings {
            surplus_threshold: 200.0,
            hysteresis_margin: 100.0,
        })),
    }
}
