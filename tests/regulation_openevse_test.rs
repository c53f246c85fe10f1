use chrono::{Duration, TimeZone, Utc};
use helion::regulation::openevse::{OpenEvseRegulator, OpenEvseSettings};
use helion::regulation::{RegulationInput, Regulator};

fn settings() -> OpenEvseSettings {
    OpenEvseSettings {
        reserve_power_w: 100.0,
        hysteresis_power_w: 600.0,
        min_charge_time_s: 300.0,
        smoothing_attack_s: 30.0,
        smoothing_decay_s: 120.0,
        min_charge_power_w: 1400.0,
        poll_interval_s: 10.0,
        max_delta_per_step_a: 3.0,
    }
}

/// Near-instant smoothing so threshold crossings show up on the next sample
fn snappy_settings() -> OpenEvseSettings {
    OpenEvseSettings {
        smoothing_attack_s: 0.001,
        smoothing_decay_s: 0.001,
        ..settings()
    }
}

fn input(
    grid_power: f64,
    current_charging: f64,
    is_off_peak: bool,
    at: chrono::DateTime<Utc>,
) -> RegulationInput {
    RegulationInput {
        grid_power,
        current_charging,
        is_off_peak,
        max_current: 40.0,
        max_house_power: 12000.0,
        target_power: 0.0,
        timestamp: at,
    }
}

fn base_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[test]
fn stays_idle_on_import() {
    let regulator = OpenEvseRegulator::new(settings());

    let output = regulator.calculate(&input(500.0, 0.0, false, base_time()));

    assert!(!output.should_charge);
    assert_eq!(output.delta_current, 0.0);
    assert_eq!(output.reason, "Grid import detected - no charging");
}

#[test]
fn stays_idle_below_start_threshold() {
    let regulator = OpenEvseRegulator::new(settings());

    // 1.5 kW excess is below min_charge_power + hysteresis = 2 kW
    let output = regulator.calculate(&input(-1500.0, 0.0, false, base_time()));

    assert!(!output.should_charge);
    assert_eq!(output.reason, "Insufficient surplus for charging");
}

#[test]
fn starts_with_rate_limited_delta() {
    let regulator = OpenEvseRegulator::new(settings());

    let output = regulator.calculate(&input(-3000.0, 0.0, false, base_time()));

    assert!(output.should_charge);
    assert_eq!(output.delta_current, 3.0);
    assert_eq!(output.reason, "Starting charge - sufficient solar excess");

    let status = regulator.status();
    assert_eq!(status["activation_count"].as_u64().unwrap(), 1);
    assert!(status["is_charging"].as_bool().unwrap());
}

#[test]
fn minimum_charge_time_gates_the_stop() {
    let regulator = OpenEvseRegulator::new(snappy_settings());
    let t0 = base_time();

    regulator.calculate(&input(-3000.0, 0.0, false, t0));

    // Excess collapses 10 s in: too early to stop, ramp down instead
    let early = regulator.calculate(&input(1000.0, 3.0, false, t0 + Duration::seconds(10)));
    assert!(early.should_charge);
    assert_eq!(early.delta_current, -3.0);
    assert_eq!(early.reason, "Maintaining charge - within minimum time");

    // Past the dwell timer the stop goes through
    let late = regulator.calculate(&input(1000.0, 0.0, false, t0 + Duration::seconds(400)));
    assert!(!late.should_charge);
    assert_eq!(late.reason, "Stopping charge - insufficient excess power");

    let status = regulator.status();
    assert_eq!(status["deactivation_count"].as_u64().unwrap(), 1);
    assert!(!status["is_charging"].as_bool().unwrap());
}

#[test]
fn target_below_minimum_collapses_to_zero() {
    let regulator = OpenEvseRegulator::new(snappy_settings());
    let t0 = base_time();

    regulator.calculate(&input(-3000.0, 0.0, false, t0));

    // 1.2 kW excess leaves (1200-100)/230 < 6 A after the reserve
    let output = regulator.calculate(&input(-510.0, 3.0, false, t0 + Duration::seconds(10)));

    assert_eq!(output.debug["smoothed_excess"].as_f64().unwrap().round(), 1200.0);
    assert_eq!(output.delta_current, -3.0);
}

#[test]
fn off_peak_is_independent_of_grid_power() {
    let regulator = OpenEvseRegulator::new(settings());

    let a = regulator.calculate(&input(-5000.0, 10.0, true, base_time()));
    let b = regulator.calculate(&input(3000.0, 10.0, true, base_time()));

    assert_eq!(a.target_current, b.target_current);
    assert_eq!(a.delta_current, b.delta_current);
    assert_eq!(a.should_charge, b.should_charge);
}

#[test]
fn reset_returns_to_idle() {
    let regulator = OpenEvseRegulator::new(settings());

    regulator.calculate(&input(-3000.0, 0.0, false, base_time()));
    regulator.reset();

    let status = regulator.status();
    assert!(!status["is_charging"].as_bool().unwrap());
    assert_eq!(status["smoothed_excess_power"], 0.0);
    assert_eq!(status["last_target_current"], 0.0);
}

#[test]
fn name_is_stable() {
    let regulator = OpenEvseRegulator::new(settings());
    assert_eq!(regulator.name(), "OpenEVSE-style Regulator");
}
